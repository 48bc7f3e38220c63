use url::Url;

use crate::facade::DiagnosticInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageLevel {
    Error,
    Warning,
    Info,
    Log,
}

/// Editor-facing push interface. Nothing is ever read back from it.
pub trait PublicationSink: Send + Sync {
    fn publish(&self, uri: &Url, diagnostics: &[DiagnosticInfo]);

    fn clear(&self, uri: &Url);

    fn log(&self, level: MessageLevel, message: &str);
}
