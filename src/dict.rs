//! Mode-aware credential dictionary generation.
//!
//! Expands task parameters into the finite, ordered [`Auth`] sequence a runner
//! walks. Expansion is deterministic and never deduplicates: the order in which
//! the operator supplied candidates is the order in which they are tried.

use crate::{
    auth::{Auth, AuthMode},
    task::Params,
};

/// Usernames tried when a task supplies none.
pub const DEFAULT_USERS: &[&str] = &["root", "admin", "administrator", "guest", "test", "user"];

/// Passwords (and SNMP communities) tried when a task supplies none.
pub const DEFAULT_PASSWORDS: &[&str] = &[
    "",
    "123456",
    "admin",
    "password",
    "root",
    "12345678",
    "111111",
    "123123",
    "P@ssw0rd",
    "%user%",
    "%user%123",
    "%user%@123",
];

/// Template token replaced with the row's username.
const USER_TOKEN: &str = "%user%";

/// Username substituted into password templates for modes that carry none.
const TEMPLATE_FALLBACK_USER: &str = "admin";

/// Task parameters copied into every generated credential's `extra` map.
const PASSTHROUGH_PARAMS: &[&str] = &["sid", "domain"];

/// Expands `params` into the credential sequence for `mode`.
///
/// For [`AuthMode::UserPass`] the output is the cartesian product of users and
/// passwords, users outermost, so every password is tried for one user before
/// the next user starts.
pub fn generate(params: &Params, mode: AuthMode) -> Vec<Auth> {
    let auths = match mode {
        AuthMode::None => vec![Auth::none()],
        AuthMode::OnlyPass => passwords(params)
            .iter()
            .map(|password| Auth::password(expand(password, TEMPLATE_FALLBACK_USER)))
            .collect(),
        AuthMode::UserPass => {
            let users = users(params);
            let passwords = passwords(params);
            let mut auths = Vec::with_capacity(users.len() * passwords.len());
            for user in &users {
                for password in &passwords {
                    auths.push(Auth::user_pass(user.clone(), expand(password, user)));
                }
            }
            auths
        }
    };
    attach_passthrough(auths, params)
}

fn users(params: &Params) -> Vec<String> {
    params
        .get_str_list("users")
        .unwrap_or_else(|| DEFAULT_USERS.iter().map(|s| s.to_string()).collect())
}

fn passwords(params: &Params) -> Vec<String> {
    params
        .get_str_list("passwords")
        .unwrap_or_else(|| DEFAULT_PASSWORDS.iter().map(|s| s.to_string()).collect())
}

/// Literal substring replacement; `%` needs no escaping in candidate passwords.
fn expand(password: &str, username: &str) -> String {
    password.replace(USER_TOKEN, username)
}

fn attach_passthrough(mut auths: Vec<Auth>, params: &Params) -> Vec<Auth> {
    for key in PASSTHROUGH_PARAMS {
        if let Some(value) = params.get_str(key) {
            for auth in &mut auths {
                auth.extra.insert(key.to_string(), value.to_string());
            }
        }
    }
    auths
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(entries: &[(&str, serde_json::Value)]) -> Params {
        let mut params = Params::default();
        for (key, value) in entries {
            params.insert(*key, value.clone());
        }
        params
    }

    #[test]
    fn user_pass_is_the_cartesian_product_in_order() {
        let params = params(&[
            ("users", serde_json::json!(["u1", "u2"])),
            ("passwords", serde_json::json!(["p1", "p2", "p3"])),
        ]);
        let auths = generate(&params, AuthMode::UserPass);
        assert_eq!(auths.len(), 6);
        let pairs: Vec<(&str, &str)> = auths
            .iter()
            .map(|a| {
                (
                    a.username.as_deref().unwrap(),
                    a.password.as_deref().unwrap(),
                )
            })
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("u1", "p1"),
                ("u1", "p2"),
                ("u1", "p3"),
                ("u2", "p1"),
                ("u2", "p2"),
                ("u2", "p3"),
            ]
        );
    }

    #[test]
    fn user_token_expands_to_the_row_username() {
        let params = params(&[
            ("users", serde_json::json!(["u1"])),
            ("passwords", serde_json::json!(["p1", "%user%_123"])),
        ]);
        let auths = generate(&params, AuthMode::UserPass);
        assert_eq!(auths[1].password.as_deref(), Some("u1_123"));
    }

    #[test]
    fn user_token_falls_back_to_admin_for_password_only_modes() {
        let params = params(&[("passwords", serde_json::json!(["%user%@2024"]))]);
        let auths = generate(&params, AuthMode::OnlyPass);
        assert_eq!(auths[0].password.as_deref(), Some("admin@2024"));
        assert_eq!(auths[0].username, None);
    }

    #[test]
    fn none_mode_yields_a_single_empty_credential() {
        let auths = generate(&Params::default(), AuthMode::None);
        assert_eq!(auths, vec![Auth::none()]);
    }

    #[test]
    fn comma_strings_are_split_and_trimmed() {
        let params = params(&[
            ("users", serde_json::json!("root")),
            ("passwords", serde_json::json!("a, b ,c")),
        ]);
        let auths = generate(&params, AuthMode::UserPass);
        let passwords: Vec<&str> = auths.iter().map(|a| a.password.as_deref().unwrap()).collect();
        assert_eq!(passwords, vec!["a", "b", "c"]);
    }

    #[test]
    fn defaults_apply_when_params_are_absent() {
        let auths = generate(&Params::default(), AuthMode::UserPass);
        assert_eq!(auths.len(), DEFAULT_USERS.len() * DEFAULT_PASSWORDS.len());
    }

    #[test]
    fn duplicates_are_preserved() {
        let params = params(&[
            ("users", serde_json::json!(["a", "a"])),
            ("passwords", serde_json::json!(["x"])),
        ]);
        assert_eq!(generate(&params, AuthMode::UserPass).len(), 2);
    }

    #[test]
    fn sid_and_domain_ride_along_in_extra() {
        let params = params(&[
            ("users", serde_json::json!(["sys"])),
            ("passwords", serde_json::json!(["x"])),
            ("sid", serde_json::json!("ORCL")),
        ]);
        let auths = generate(&params, AuthMode::UserPass);
        assert_eq!(auths[0].extra.get("sid").map(String::as_str), Some("ORCL"));
    }
}
