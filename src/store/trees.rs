// Content tree (Course -> Unit -> Lesson -> Challenge -> Option)
pub const COURSES: &str = "courses";
pub const UNITS: &str = "units";
pub const LESSONS: &str = "lessons";
pub const CHALLENGES: &str = "challenges";
pub const CHALLENGE_OPTIONS: &str = "challenge_options";
pub const CONTENT_INDEX: &str = "content_index";

// Learner state
pub const USER_PROGRESS: &str = "user_progress";
pub const CHALLENGE_PROGRESS: &str = "challenge_progress";
pub const PERFORMANCE_RECORDS: &str = "performance_records";
pub const ANSWER_TALLIES: &str = "answer_tallies";
pub const SUBSCRIPTIONS: &str = "subscriptions";

pub const CONFIG_VERSIONS: &str = "config_versions";
