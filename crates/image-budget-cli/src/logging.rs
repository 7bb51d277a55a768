use std::io::Write;

use env_logger::Target;

/// Filter used when `RUST_LOG` is unset. Only this tool's crates get
/// verbose, dependencies stay at `warn`.
fn default_filter(debug: bool) -> &'static str {
    if debug {
        "warn,image_budget=debug,image_budget_cli=debug"
    } else {
        "warn,image_budget=info,image_budget_cli=info"
    }
}

/// Log to stderr so `scan` output on stdout stays machine readable.
pub fn init_logging(debug: bool) {
    let env = env_logger::Env::default().default_filter_or(default_filter(debug));

    env_logger::Builder::from_env(env)
        .target(Target::Stderr)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_only_raises_this_tools_crates() {
        assert!(default_filter(true).starts_with("warn,"));
        assert!(default_filter(true).contains("image_budget=debug"));
        assert!(default_filter(false).contains("image_budget_cli=info"));
    }
}
