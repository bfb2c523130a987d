use crate::store::StoreError;

const KEY_SEPARATOR: char = ':';

/// 用户 ID 作为 key 前缀使用，不允许为空或包含分隔符，否则前缀扫描会串号
fn checked_user_id(user_id: &str) -> Result<&str, StoreError> {
    if user_id.is_empty() || user_id.contains(KEY_SEPARATOR) {
        return Err(StoreError::Validation(format!(
            "invalid user id for storage key: {user_id:?}"
        )));
    }
    Ok(user_id)
}

pub fn content_key(id: u64) -> String {
    format!("{id:020}")
}

pub fn parse_content_key(raw: &[u8]) -> Option<u64> {
    std::str::from_utf8(raw).ok()?.parse::<u64>().ok()
}

// Parent -> child edges in `content_index`

pub fn course_unit_edge(course_id: u64, unit_id: u64) -> String {
    format!("course:{course_id:020}:unit:{unit_id:020}")
}

pub fn course_units_prefix(course_id: u64) -> String {
    format!("course:{course_id:020}:unit:")
}

pub fn unit_lesson_edge(unit_id: u64, lesson_id: u64) -> String {
    format!("unit:{unit_id:020}:lesson:{lesson_id:020}")
}

pub fn unit_lessons_prefix(unit_id: u64) -> String {
    format!("unit:{unit_id:020}:lesson:")
}

pub fn lesson_challenge_edge(lesson_id: u64, challenge_id: u64) -> String {
    format!("lesson:{lesson_id:020}:challenge:{challenge_id:020}")
}

pub fn lesson_challenges_prefix(lesson_id: u64) -> String {
    format!("lesson:{lesson_id:020}:challenge:")
}

pub fn challenge_option_edge(challenge_id: u64, option_id: u64) -> String {
    format!("challenge:{challenge_id:020}:option:{option_id:020}")
}

pub fn challenge_options_prefix(challenge_id: u64) -> String {
    format!("challenge:{challenge_id:020}:option:")
}

/// Child id is always the last segment of an edge key.
pub fn parse_edge_child(edge: &[u8]) -> Option<u64> {
    let sep = edge.iter().rposition(|b| *b == KEY_SEPARATOR as u8)?;
    parse_content_key(&edge[sep + 1..])
}

pub fn user_progress_key(user_id: &str) -> Result<String, StoreError> {
    Ok(checked_user_id(user_id)?.to_string())
}

pub fn challenge_progress_key(user_id: &str, challenge_id: u64) -> Result<String, StoreError> {
    Ok(format!("{}:{challenge_id:020}", checked_user_id(user_id)?))
}

pub fn challenge_progress_prefix(user_id: &str) -> Result<String, StoreError> {
    Ok(format!("{}:", checked_user_id(user_id)?))
}

pub fn performance_record_key(
    user_id: &str,
    timestamp_ms: i64,
    record_id: &str,
) -> Result<String, StoreError> {
    let ts = timestamp_ms.max(0) as u64;
    let reverse_ts = u64::MAX - ts;
    Ok(format!(
        "{}:{:020}:{}",
        checked_user_id(user_id)?,
        reverse_ts,
        record_id
    ))
}

pub fn performance_record_prefix(user_id: &str) -> Result<String, StoreError> {
    Ok(format!("{}:", checked_user_id(user_id)?))
}

pub fn answer_tally_key(user_id: &str, challenge_id: u64) -> Result<String, StoreError> {
    Ok(format!("{}:{challenge_id:020}", checked_user_id(user_id)?))
}

pub fn subscription_key(user_id: &str) -> Result<String, StoreError> {
    Ok(checked_user_id(user_id)?.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn performance_keys_order_newest_first() {
        let newer = performance_record_key("u1", 2000, "r2").unwrap();
        let older = performance_record_key("u1", 1000, "r1").unwrap();
        assert!(newer < older);
    }

    #[test]
    fn edge_child_is_parsed_from_last_segment() {
        let edge = unit_lesson_edge(7, 42);
        assert!(edge.starts_with(&unit_lessons_prefix(7)));
        assert_eq!(parse_edge_child(edge.as_bytes()), Some(42));
    }

    #[test]
    fn content_keys_sort_numerically() {
        assert!(content_key(9) < content_key(10));
        assert_eq!(parse_content_key(content_key(123).as_bytes()), Some(123));
    }

    #[test]
    fn user_ids_with_separator_are_rejected() {
        assert!(matches!(
            user_progress_key("a:b"),
            Err(StoreError::Validation(_))
        ));
        assert!(challenge_progress_key("", 1).is_err());
    }
}
