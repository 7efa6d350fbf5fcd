use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Installs the global logger. `RUST_LOG` overrides the `info` default.
///
/// Logs go to stderr so approval prompts on stdout stay readable.
pub fn init() {
    INIT.call_once(|| {
        let mut builder =
            env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
        builder
            .format(|buf, record| {
                writeln!(
                    buf,
                    "{} {} {} {}",
                    buf.timestamp_millis(),
                    record.level(),
                    record.target(),
                    record.args()
                )
            })
            .target(env_logger::Target::Stderr);
        let _ = builder.try_init();
    });
}
