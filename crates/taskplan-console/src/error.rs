use std::fmt;

/// Coarse failure class; lets the UI decide how loudly to report an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request never reached the backend or no response arrived.
    Transport,
    /// The backend answered with a failure status or an error document.
    Backend,
    /// A template name and its arguments disagree on the placeholder count.
    Template,
    Config,
    Io,
    Decode,
    Other,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Backend => "backend",
            ErrorKind::Template => "template",
            ErrorKind::Config => "config",
            ErrorKind::Io => "io",
            ErrorKind::Decode => "decode",
            ErrorKind::Other => "error",
        }
    }
}

#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    msg: String,
}

impl Error {
    pub fn msg<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Other, msg)
    }

    pub fn new<M: Into<String>>(kind: ErrorKind, msg: M) -> Self {
        Self {
            kind,
            msg: msg.into(),
        }
    }

    pub fn transport<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Transport, msg)
    }

    pub fn backend<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Backend, msg)
    }

    pub fn template<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Template, msg)
    }

    pub fn config<M: Into<String>>(msg: M) -> Self {
        Self::new(ErrorKind::Config, msg)
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.msg
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.msg)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::new(ErrorKind::Io, err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Self::new(ErrorKind::Config, err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::new(ErrorKind::Decode, err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::new(ErrorKind::Decode, err.to_string())
        } else if let Some(status) = err.status() {
            Self::backend(format!("backend returned {status}"))
        } else {
            Self::transport(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
