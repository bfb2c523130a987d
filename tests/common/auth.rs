use progression_backend::auth::{sign_jwt_for_admin, sign_jwt_for_user};
use progression_backend::config::Config;

/// Token for a fresh learner id, signed the way the identity provider would.
pub fn learner_token(config: &Config) -> (String, String) {
    let user_id = format!("learner-{}", uuid::Uuid::new_v4().simple());
    let token = sign_jwt_for_user(&user_id, &config.jwt_secret, 1).expect("sign user token");
    (user_id, token)
}

pub fn token_for(config: &Config, user_id: &str) -> String {
    sign_jwt_for_user(user_id, &config.jwt_secret, 1).expect("sign user token")
}

pub fn admin_token(config: &Config) -> String {
    sign_jwt_for_admin("admin-1", &config.admin_jwt_secret, 1).expect("sign admin token")
}

pub fn auth_header(token: &str) -> String {
    format!("Bearer {token}")
}
