use std::fmt;

/// Custom error type that includes exit codes
#[derive(Debug)]
pub enum DomscopeError {
    /// Container failed to resolve on the current page (exit code 2)
    ContainerNotFound(String),
    /// No site library matched the URL or site key (exit code 3)
    UnknownSite(String),
    /// WebDriver connection failed (exit code 4)
    WebDriverFailed(String),
    /// Container library could not be read at startup (exit code 5).
    /// The only fatal load condition: without a valid library no scoped
    /// operation is safe.
    LibraryLoadFailed(String),
    /// Requested capability is not granted by the container definition (exit code 6)
    CapabilityDenied(String),
    /// Generic error (exit code 1)
    Other(anyhow::Error),
}

impl DomscopeError {
    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            DomscopeError::ContainerNotFound(_) => 2,
            DomscopeError::UnknownSite(_) => 3,
            DomscopeError::WebDriverFailed(_) => 4,
            DomscopeError::LibraryLoadFailed(_) => 5,
            DomscopeError::CapabilityDenied(_) => 6,
            DomscopeError::Other(_) => 1,
        }
    }
}

impl fmt::Display for DomscopeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DomscopeError::ContainerNotFound(id) => {
                write!(f, "Container did not resolve on the current page: {}", id)
            }
            DomscopeError::UnknownSite(what) => {
                write!(f, "No site library matches: {}", what)
            }
            DomscopeError::WebDriverFailed(msg) => {
                write!(f, "WebDriver connection failed: {}", msg)
            }
            DomscopeError::LibraryLoadFailed(msg) => {
                write!(f, "Container library load failed: {}", msg)
            }
            DomscopeError::CapabilityDenied(msg) => write!(f, "{}", msg),
            DomscopeError::Other(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for DomscopeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DomscopeError::Other(err) => Some(err.as_ref()),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for DomscopeError {
    fn from(err: anyhow::Error) -> Self {
        // Try to detect specific error types from the error message
        let msg = err.to_string();

        if msg.contains("did not resolve on the current page") {
            DomscopeError::ContainerNotFound(msg)
        } else if msg.contains("No site library matches") {
            DomscopeError::UnknownSite(msg)
        } else if msg.contains("Container library load failed")
            || msg.contains("Failed to read container library")
        {
            DomscopeError::LibraryLoadFailed(msg)
        } else if msg.contains("Failed to connect to WebDriver")
            || msg.contains("WebDriver")
            || msg.contains("geckodriver")
            || msg.contains("chromedriver")
        {
            DomscopeError::WebDriverFailed(msg)
        } else if msg.contains("does not grant the") {
            DomscopeError::CapabilityDenied(msg)
        } else {
            DomscopeError::Other(err)
        }
    }
}
