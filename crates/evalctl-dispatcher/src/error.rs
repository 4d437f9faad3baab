use evalctl_types::ErrorKind;

/// C6's failure classes (§4.6 "Execute(request) contract" and §7's
/// `ErrorKind` table). Maps onto [`ErrorKind`] at the C7/C8 boundary.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("no image available for the requested language")]
    NoImage,
    #[error("cluster unavailable: {0}")]
    ClusterUnavailable(String),
    #[error("namespace quota exceeded")]
    QuotaExceeded,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoImage => ErrorKind::NoImage,
            Self::ClusterUnavailable(_) => ErrorKind::ClusterUnavailable,
            Self::QuotaExceeded => ErrorKind::QuotaExceeded,
            Self::Forbidden(_) | Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
        }
    }
}

impl From<kube::Error> for DispatchError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(resp) if resp.code == 403 => Self::Forbidden(resp.message.clone()),
            kube::Error::Api(resp) if resp.code == 429 => Self::QuotaExceeded,
            other => Self::ClusterUnavailable(other.to_string()),
        }
    }
}
