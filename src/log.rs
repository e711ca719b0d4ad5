//! Logging setup, lifted from the teacher's `utils::init_log` /
//! `tests::init_log` helpers: a single `env_logger` initialization with a
//! timestamped, file:line-qualified format.

use std::io::Write;
use std::sync::Once;

static INIT: Once = Once::new();

/// Installs `env_logger` once per process. Safe to call repeatedly (e.g.
/// from every test's setup routine); only the first call takes effect.
pub fn init_log() {
    INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format_timestamp_millis()
            .format(|buf, record| {
                writeln!(
                    buf,
                    "[{} {}] [{}:{}] {}",
                    record.level(),
                    record.target(),
                    record.file().unwrap_or("?"),
                    record.line().unwrap_or(0),
                    record.args()
                )
            })
            .init();
    });
}
