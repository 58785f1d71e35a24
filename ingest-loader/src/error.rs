use ingest::error::IngestError;
use std::backtrace::Backtrace;
use std::error::Error;
use std::fmt;

fn should_render_backtrace() -> bool {
    matches!(
        std::env::var("RUST_BACKTRACE").as_deref(),
        Ok("1") | Ok("full")
    )
}

pub type LoaderResult<T> = Result<T, LoaderError>;

/// Backtrace captured when an infrastructure error is created.
pub struct CapturedBacktrace(Backtrace);

impl CapturedBacktrace {
    fn capture() -> Self {
        Self(Backtrace::capture())
    }
}

impl fmt::Debug for CapturedBacktrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error type of the loader binary.
///
/// Table failures arrive aggregated in [`LoaderError::Ingest`]; the other variants stop the run
/// before any table is merged.
#[derive(Debug)]
pub enum LoaderError {
    Ingest(IngestError),
    Config(Box<dyn Error + Send + Sync>, CapturedBacktrace),
    Database(sqlx::Error, CapturedBacktrace),
    Io(std::io::Error, CapturedBacktrace),
}

impl LoaderError {
    pub fn category(&self) -> &'static str {
        match self {
            LoaderError::Ingest(_) => "ingestion error",
            LoaderError::Config(_, _) => "configuration error",
            LoaderError::Database(_, _) => "database error",
            LoaderError::Io(_, _) => "i/o error",
        }
    }

    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self {
            LoaderError::Ingest(err) => err.backtrace(),
            LoaderError::Config(_, cb) => Some(&cb.0),
            LoaderError::Database(_, cb) => Some(&cb.0),
            LoaderError::Io(_, cb) => Some(&cb.0),
        }
    }

    pub fn config<E: Error + Send + Sync + 'static>(err: E) -> Self {
        LoaderError::Config(Box::new(err), CapturedBacktrace::capture())
    }

    /// Returns a report for terminal output, listing every failed table of an aggregate.
    pub fn render_report(&self) -> String {
        let mut out = String::new();
        out.push_str("loader failed\n");
        out.push_str(&format!("category: {}\n", self.category()));

        if let LoaderError::Ingest(err) = self
            && let Some(errors) = err.errors()
        {
            for (idx, table_error) in errors.iter().enumerate() {
                out.push_str(&format!("error {}: {}\n", idx + 1, table_error.summary()));
            }
        } else {
            out.push_str(&format!("error: {self}\n"));

            let mut source = Error::source(self);
            let mut idx = 1usize;
            while let Some(err) = source {
                out.push_str(&format!("cause {idx}: {err}\n"));
                source = err.source();
                idx += 1;
            }
        }

        if should_render_backtrace()
            && let Some(backtrace) = self.backtrace()
        {
            out.push_str("backtrace:\n");
            out.push_str(&backtrace.to_string());
            if !out.ends_with('\n') {
                out.push('\n');
            }
        }

        out
    }
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoaderError::Ingest(err) => write!(f, "{}", err.summary()),
            LoaderError::Config(source, _) => write!(f, "configuration error: {source}"),
            LoaderError::Database(source, _) => write!(f, "database error: {source}"),
            LoaderError::Io(source, _) => write!(f, "i/o error: {source}"),
        }
    }
}

impl Error for LoaderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LoaderError::Ingest(err) => err.source(),
            LoaderError::Config(source, _) => Some(source.as_ref()),
            LoaderError::Database(source, _) => Some(source),
            LoaderError::Io(source, _) => Some(source),
        }
    }
}

impl From<sqlx::Error> for LoaderError {
    fn from(err: sqlx::Error) -> Self {
        LoaderError::Database(err, CapturedBacktrace::capture())
    }
}

impl From<std::io::Error> for LoaderError {
    fn from(err: std::io::Error) -> Self {
        LoaderError::Io(err, CapturedBacktrace::capture())
    }
}

impl From<IngestError> for LoaderError {
    fn from(err: IngestError) -> Self {
        LoaderError::Ingest(err)
    }
}
