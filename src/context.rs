//! Runtime Context Module
//!
//! Process-wide system parameters and the ambient acting user:
//! - Parameters arrive as one JSON object in the `CUBEVAULT_PARAMS`
//!   environment variable, parsed exactly once
//! - The acting user is per-thread state, set explicitly by request
//!   handlers and falling back to parameters or the OS user
//! - `CUBEVAULT_ENV` supplies the `env` coordinate for classpath lookups

use once_cell::sync::Lazy;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;

/// Environment variable holding the JSON parameter object.
pub const PARAMS_ENV_VAR: &str = "CUBEVAULT_PARAMS";

/// Environment variable naming the deployment environment level.
pub const ENV_LEVEL_VAR: &str = "CUBEVAULT_ENV";

/// Parameter key overriding the acting user.
pub const PARAM_USER: &str = "user";

static SYSTEM_PARAMS: Lazy<HashMap<String, Value>> = Lazy::new(|| {
    match std::env::var(PARAMS_ENV_VAR) {
        Ok(raw) => match serde_json::from_str::<HashMap<String, Value>>(&raw) {
            Ok(map) => map,
            Err(e) => {
                log::warn!("Ignoring malformed {}: {}", PARAMS_ENV_VAR, e);
                HashMap::new()
            }
        },
        Err(_) => HashMap::new(),
    }
});

thread_local! {
    static ACTING_USER: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Look up a system parameter by key.
pub fn system_param(key: &str) -> Option<&'static Value> {
    SYSTEM_PARAMS.get(key)
}

/// Deployment environment level, if configured.
pub fn env_level() -> Option<String> {
    std::env::var(ENV_LEVEL_VAR).ok().filter(|v| !v.is_empty())
}

/// Set the acting user for the current thread.
pub fn set_acting_user(user: impl Into<String>) {
    ACTING_USER.with(|u| *u.borrow_mut() = Some(user.into()));
}

/// Clear the per-thread acting user, reverting to the ambient fallbacks.
pub fn clear_acting_user() {
    ACTING_USER.with(|u| *u.borrow_mut() = None);
}

/// Resolve the acting user for the current thread.
///
/// Resolution order: explicit per-thread value, then the `user` system
/// parameter, then the OS user, then `"unknown"`.
pub fn acting_user() -> String {
    if let Some(user) = ACTING_USER.with(|u| u.borrow().clone()) {
        return user;
    }
    if let Some(Value::String(user)) = system_param(PARAM_USER) {
        return user.clone();
    }
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Run a closure with the acting user set, restoring the previous value
/// afterwards.
pub fn with_user<T>(user: &str, f: impl FnOnce() -> T) -> T {
    let previous = ACTING_USER.with(|u| u.borrow().clone());
    set_acting_user(user);
    let result = f();
    ACTING_USER.with(|u| *u.borrow_mut() = previous);
    result
}
