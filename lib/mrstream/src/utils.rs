pub fn env_var_truthy(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => is_truthy(&v),
        Err(_) => false,
    }
}

pub fn env_var_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse::<T>().ok())
}

fn is_truthy(v: &str) -> bool {
    let v = v.to_ascii_lowercase();
    v == "1" || v == "true" || v == "yes" || v == "on"
}

/// Namespace for this run's temp files: `p<pid>`.
pub fn process_run_id() -> String {
    format!("p{}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        for v in ["1", "true", "YES", "On"] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["0", "false", "", "enabled"] {
            assert!(!is_truthy(v), "{v}");
        }
    }

    #[test]
    fn run_id_names_this_process() {
        assert_eq!(process_run_id(), format!("p{}", std::process::id()));
    }
}
