use dyn_clone::DynClone;
use reqwest::blocking::ClientBuilder;
use reqwest::header::{HeaderValue, CACHE_CONTROL};
use reqwest::StatusCode;
use snafu::Snafu;
use std::fmt::Debug;
use std::io::{ErrorKind, Read};
use std::time::Duration;
use url::Url;

/// A trait to abstract over the method/protocol by which files are obtained.
///
/// The trait hides the underlying types involved by returning the `Read`
/// object as a `Box<dyn Read + Send>` and by requiring concrete type
/// [`TransportError`] as the error type.
pub trait Transport: Debug + DynClone + Send {
    /// Opens a `Read` object for the file specified by `url`.
    fn fetch(&self, url: Url) -> Result<Box<dyn Read + Send>, TransportError>;

    /// Like [`fetch`](Transport::fetch), but asks intermediaries not to
    /// store the response. Transports without a cache layer may ignore the
    /// distinction.
    fn fetch_no_store(&self, url: Url) -> Result<Box<dyn Read + Send>, TransportError> {
        self.fetch(url)
    }
}

// Implement `Clone` for `Transport` trait objects.
dyn_clone::clone_trait_object!(Transport);

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// The kind of error that the transport object experienced during `fetch`.
///
/// # Why
///
/// Some TUF operations need to know if a [`Transport`] failure is a result
/// of a file not being found. In particular:
/// > 5.1.2. Try downloading version N+1 of the root metadata file `[...]`
/// > If this file is not available `[...]` then go to step 5.1.9.
///
/// To distinguish this case from other [`Transport`] failures, we use
/// `TransportErrorKind::FileNotFound`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportErrorKind {
    /// The trait does not handle the URL scheme named in `String`. e.g.
    /// `file://` or `http://`.
    UnsupportedUrlScheme,
    /// The file cannot be found.
    FileNotFound,
    /// The server understood the request but requires authorization. The
    /// Notary health check treats this as "reachable".
    Unauthorized,
    /// The transport failed for any other reason, e.g. IO error, HTTP
    /// broken pipe, etc.
    Other,
}

/// The error type that [`Transport`] `fetch` returns.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
#[snafu(display("Transport '{}' error fetching '{}': {}", kind, url, source))]
pub struct TransportError {
    /// The kind of error that occurred.
    pub kind: TransportErrorKind,
    /// The URL that the transport was trying to fetch.
    pub url: String,
    /// The underlying error that occurred.
    pub source: Box<dyn std::error::Error + Send + Sync>,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TransportErrorKind::UnsupportedUrlScheme => "unsupported URL scheme",
            TransportErrorKind::FileNotFound => "file not found",
            TransportErrorKind::Unauthorized => "unauthorized",
            TransportErrorKind::Other => "other",
        })
    }
}

impl TransportError {
    /// Creates a new [`TransportError`].
    pub fn new<S, E>(kind: TransportErrorKind, url: S, source_error: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        S: AsRef<str>,
    {
        Self {
            kind,
            url: url.as_ref().into(),
            source: source_error.into(),
        }
    }

    /// Creates a [`TransportError`] for reporting an unhandled URL type.
    pub fn unsupported_scheme<S: AsRef<str>>(url: S) -> Self {
        TransportError::new(
            TransportErrorKind::UnsupportedUrlScheme,
            url,
            "Transport cannot handle the given URL scheme.".to_string(),
        )
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// Provides a [`Transport`] for local files.
#[derive(Debug, Clone, Copy)]
pub struct FilesystemTransport;

impl Transport for FilesystemTransport {
    fn fetch(&self, url: Url) -> Result<Box<dyn Read + Send>, TransportError> {
        if url.scheme() != "file" {
            return Err(TransportError::unsupported_scheme(url));
        }

        let f = std::fs::File::open(url.path()).map_err(|e| {
            let kind = match e.kind() {
                ErrorKind::NotFound => TransportErrorKind::FileNotFound,
                _ => TransportErrorKind::Other,
            };
            TransportError::new(kind, url, e)
        })?;
        Ok(Box::new(f))
    }
}

// =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=   =^..^=

/// A builder for [`HttpTransport`] which allows settings customization.
///
/// # Example
///
/// ```
/// # use sturdy::HttpTransportBuilder;
/// # use std::time::Duration;
/// let http_transport = HttpTransportBuilder::new()
///     .timeout(Duration::from_secs(10))
///     .build();
/// ```
#[derive(Clone, Copy, Debug)]
pub struct HttpTransportBuilder {
    timeout: Duration,
    connect_timeout: Duration,
}

impl Default for HttpTransportBuilder {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl HttpTransportBuilder {
    /// Create a new `HttpTransportBuilder` with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a timeout for the complete fetch operation.
    #[must_use]
    pub fn timeout(mut self, value: Duration) -> Self {
        self.timeout = value;
        self
    }

    /// Set a timeout for only the connect phase, which includes the TLS
    /// handshake.
    #[must_use]
    pub fn connect_timeout(mut self, value: Duration) -> Self {
        self.connect_timeout = value;
        self
    }

    /// Construct an [`HttpTransport`] from this builder's settings.
    pub fn build(self) -> HttpTransport {
        HttpTransport { settings: self }
    }
}

/// A [`Transport`] over HTTPS. Use the [`HttpTransportBuilder`] to construct
/// a custom `HttpTransport`, or use `HttpTransport::default()`.
///
/// This transport returns `FileNotFound` for HTTP 404 and 410 responses and
/// `Unauthorized` for 401, so that callers can give those statuses
/// structural meaning.
#[derive(Clone, Copy, Debug, Default)]
pub struct HttpTransport {
    settings: HttpTransportBuilder,
}

impl HttpTransport {
    fn get(
        &self,
        url: Url,
        no_store: bool,
    ) -> Result<Box<dyn Read + Send>, TransportError> {
        let client = ClientBuilder::new()
            .timeout(self.settings.timeout)
            .connect_timeout(self.settings.connect_timeout)
            .build()
            .map_err(|e| TransportError::new(TransportErrorKind::Other, &url, e))?;

        let mut request = client.get(url.clone());
        if no_store {
            request = request.header(CACHE_CONTROL, HeaderValue::from_static("no-store"));
        }

        let response = request
            .send()
            .map_err(|e| TransportError::new(TransportErrorKind::Other, &url, e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(Box::new(response));
        }
        let kind = match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => TransportErrorKind::FileNotFound,
            StatusCode::UNAUTHORIZED => TransportErrorKind::Unauthorized,
            _ => TransportErrorKind::Other,
        };
        Err(TransportError::new(
            kind,
            &url,
            format!("server returned status '{status}'"),
        ))
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: Url) -> Result<Box<dyn Read + Send>, TransportError> {
        self.get(url, false)
    }

    fn fetch_no_store(&self, url: Url) -> Result<Box<dyn Read + Send>, TransportError> {
        self.get(url, true)
    }
}
