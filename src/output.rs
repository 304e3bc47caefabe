/// Abstraction over user-facing messages.
///
/// The CLI prints them; a desktop shell would route `error` to a dialog.
/// Library code reports through this trait instead of `println!`.
pub trait UserOutput: Send + Sync {
    /// Informational status message (e.g., "Starting backend for 'blog'...")
    fn status(&self, message: &str);

    fn success(&self, message: &str);

    fn warning(&self, message: &str);

    /// User-visible failure, already formatted with its hint.
    fn error(&self, message: &str);
}

/// Standard CLI output: writes to stdout/stderr.
pub struct CliOutput;

impl UserOutput for CliOutput {
    fn status(&self, message: &str) {
        println!("{}", message);
    }

    fn success(&self, message: &str) {
        println!("{}", message);
    }

    fn warning(&self, message: &str) {
        eprintln!("{}", message);
    }

    fn error(&self, message: &str) {
        eprintln!("\x1b[31m{}\x1b[0m", message);
    }
}

/// Suppresses all output.
pub struct QuietOutput;

impl UserOutput for QuietOutput {
    fn status(&self, _message: &str) {}
    fn success(&self, _message: &str) {}
    fn warning(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}
