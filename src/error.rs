use axum::{http::StatusCode, response::IntoResponse, response::Response, Json};
use serde::Serialize;

pub type AppResult<T> = Result<T, AppError>;

/// The full wire error taxonomy. Every variant carries a stable `rest_code`
/// and maps to exactly one HTTP status; see `AppError::status`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    // -- client identity --
    #[error("account does not exist")]
    AccountDoesNotExist,
    #[error("user does not exist")]
    UserDoesNotExist,
    #[error("account blocked")]
    AccountBlocked,
    #[error("key does not exist")]
    KeyDoesNotExist,
    #[error("invalid key id")]
    InvalidKeyId,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid authentication token")]
    InvalidAuthenticationToken,
    #[error("invalid http authentication token")]
    InvalidHttpAuthenticationToken,
    #[error("invalid algorithm")]
    InvalidAlgorithm,
    #[error("authorization required")]
    AuthorizationRequired,
    #[error("authorization scheme not allowed")]
    AuthorizationSchemeNotAllowed,
    #[error("authorization failed")]
    AuthorizationFailed,
    #[error("no matching role tag")]
    NoMatchingRoleTag,
    #[error("invalid role: {0}")]
    InvalidRole(String),
    #[error("invalid role tag")]
    InvalidRoleTag,
    #[error("missing permission")]
    MissingPermission,
    #[error("invalid query string authentication")]
    InvalidQueryStringAuthentication,

    // -- request shape --
    #[error("invalid resource")]
    InvalidResource,
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid update")]
    InvalidUpdate,
    #[error("invalid durability level")]
    InvalidDurabilityLevel,
    #[error("invalid link")]
    InvalidLink,
    #[error("location required")]
    LocationRequired,
    #[error("invalid max-content-length")]
    InvalidMaxContentLength,
    #[error("content-length required")]
    ContentLengthRequired,
    #[error("content-md5 mismatch")]
    ContentMd5Mismatch,
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("not acceptable")]
    NotAcceptable,
    #[error("range not satisfiable")]
    RangeNotSatisfiable { content_length: u64 },

    // -- namespace --
    #[error("resource not found")]
    ResourceNotFound,
    #[error("directory does not exist")]
    DirectoryDoesNotExist,
    #[error("directory not empty")]
    DirectoryNotEmpty,
    #[error("directory limit exceeded")]
    DirectoryLimitExceeded,
    #[error("operation not allowed on directory")]
    OperationNotAllowedOnDirectory,
    #[error("operation not allowed on root directory")]
    OperationNotAllowedOnRootDirectory,
    #[error("parent not directory")]
    ParentNotDirectory,
    #[error("entity already exists")]
    EntityAlreadyExists,
    #[error("source object not found")]
    SourceObjectNotFound,
    #[error("link not object")]
    LinkNotObject,
    #[error("concurrent request")]
    ConcurrentRequest,

    // -- MPU --
    #[error("multipart upload invalid argument: {0}")]
    MultipartUploadInvalidArgument(String),
    #[error("invalid multipart upload state")]
    InvalidMultipartUploadState,
    #[error("multipart upload part number out of range")]
    MultipartUploadPartNum,

    // -- transport / capacity --
    #[error("not enough space")]
    NotEnoughSpace,
    #[error("max content length exceeded")]
    MaxContentLengthExceeded,
    #[error("upload timeout")]
    UploadTimeout,
    #[error("upload abandoned")]
    UploadAbandoned,
    #[error("expected upgrade")]
    ExpectedUpgrade,
    #[error("throttled")]
    Throttled,
    #[error("service unavailable")]
    ServiceUnavailable,
    #[error("method not allowed")]
    MethodNotAllowed,
    #[error("query parameter forbidden: {0}")]
    QueryParameterForbidden(String),
    #[error("unprocessable entity: {0}")]
    UnprocessableEntity(String),

    // -- server --
    #[error("internal error")]
    InternalError,
    #[error("not implemented")]
    NotImplemented,
    #[error("snaplinks disabled")]
    SnaplinksDisabled,
    #[error("secure transport required")]
    SecureTransportRequired,
}

impl AppError {
    pub fn rest_code(&self) -> &'static str {
        use AppError::*;
        match self {
            AccountDoesNotExist => "AccountDoesNotExist",
            UserDoesNotExist => "UserDoesNotExist",
            AccountBlocked => "AccountBlocked",
            KeyDoesNotExist => "KeyDoesNotExist",
            InvalidKeyId => "InvalidKeyId",
            InvalidSignature => "InvalidSignature",
            InvalidAuthenticationToken => "InvalidAuthenticationToken",
            InvalidHttpAuthenticationToken => "InvalidHttpAuthenticationToken",
            InvalidAlgorithm => "InvalidAlgorithm",
            AuthorizationRequired => "AuthorizationRequired",
            AuthorizationSchemeNotAllowed => "AuthorizationSchemeNotAllowed",
            AuthorizationFailed => "AuthorizationFailed",
            NoMatchingRoleTag => "NoMatchingRoleTag",
            InvalidRole(_) => "InvalidRole",
            InvalidRoleTag => "InvalidRoleTag",
            MissingPermission => "MissingPermission",
            InvalidQueryStringAuthentication => "InvalidQueryStringAuthentication",
            InvalidResource => "InvalidResource",
            InvalidParameter(_) => "InvalidParameter",
            InvalidUpdate => "InvalidUpdate",
            InvalidDurabilityLevel => "InvalidDurabilityLevel",
            InvalidLink => "InvalidLink",
            LocationRequired => "LocationRequired",
            InvalidMaxContentLength => "InvalidMaxContentLength",
            ContentLengthRequired => "ContentLengthRequired",
            ContentMd5Mismatch => "ContentMD5Mismatch",
            BadRequest(_) => "BadRequest",
            NotAcceptable => "NotAcceptable",
            RangeNotSatisfiable { .. } => "RangeNotSatisfiable",
            ResourceNotFound => "ResourceNotFound",
            DirectoryDoesNotExist => "DirectoryDoesNotExist",
            DirectoryNotEmpty => "DirectoryNotEmpty",
            DirectoryLimitExceeded => "DirectoryLimitExceeded",
            OperationNotAllowedOnDirectory => "OperationNotAllowedOnDirectory",
            OperationNotAllowedOnRootDirectory => "OperationNotAllowedOnRootDirectory",
            ParentNotDirectory => "ParentNotDirectory",
            EntityAlreadyExists => "EntityAlreadyExists",
            SourceObjectNotFound => "SourceObjectNotFound",
            LinkNotObject => "LinkNotObject",
            ConcurrentRequest => "ConcurrentRequest",
            MultipartUploadInvalidArgument(_) => "MultipartUploadInvalidArgument",
            InvalidMultipartUploadState => "InvalidMultipartUploadState",
            MultipartUploadPartNum => "MultipartUploadPartNum",
            NotEnoughSpace => "NotEnoughSpace",
            MaxContentLengthExceeded => "MaxContentLengthExceeded",
            UploadTimeout => "UploadTimeout",
            UploadAbandoned => "UploadAbandoned",
            ExpectedUpgrade => "ExpectedUpgrade",
            Throttled => "ThrottledError",
            ServiceUnavailable => "ServiceUnavailable",
            MethodNotAllowed => "MethodNotAllowed",
            QueryParameterForbidden(_) => "QueryParameterForbidden",
            UnprocessableEntity(_) => "UnprocessableEntity",
            InternalError => "InternalError",
            NotImplemented => "NotImplemented",
            SnaplinksDisabled => "SnaplinksDisabled",
            SecureTransportRequired => "SecureTransportRequired",
        }
    }

    pub fn status(&self) -> StatusCode {
        use AppError::*;
        match self {
            AccountDoesNotExist | UserDoesNotExist | AccountBlocked | KeyDoesNotExist
            | InvalidKeyId | InvalidSignature | InvalidAuthenticationToken
            | InvalidHttpAuthenticationToken | AuthorizationSchemeNotAllowed
            | AuthorizationFailed | NoMatchingRoleTag | MissingPermission
            | InvalidQueryStringAuthentication | QueryParameterForbidden(_)
            | SnaplinksDisabled | SecureTransportRequired => StatusCode::FORBIDDEN,
            InvalidAlgorithm | AuthorizationRequired => StatusCode::UNAUTHORIZED,
            InvalidRole(_) | InvalidRoleTag | MultipartUploadInvalidArgument(_)
            | InvalidMultipartUploadState | MultipartUploadPartNum => StatusCode::CONFLICT,
            InvalidResource | InvalidParameter(_) | InvalidUpdate | InvalidDurabilityLevel
            | InvalidLink | LocationRequired | InvalidMaxContentLength | ContentMd5Mismatch
            | BadRequest(_) | DirectoryNotEmpty | OperationNotAllowedOnDirectory
            | OperationNotAllowedOnRootDirectory | ParentNotDirectory => {
                StatusCode::BAD_REQUEST
            }
            NotAcceptable => StatusCode::NOT_ACCEPTABLE,
            RangeNotSatisfiable { .. } => StatusCode::RANGE_NOT_SATISFIABLE,
            ContentLengthRequired => StatusCode::LENGTH_REQUIRED,
            ResourceNotFound | DirectoryDoesNotExist | SourceObjectNotFound => {
                StatusCode::NOT_FOUND
            }
            DirectoryLimitExceeded | EntityAlreadyExists | ConcurrentRequest => {
                StatusCode::CONFLICT
            }
            LinkNotObject => StatusCode::BAD_REQUEST,
            NotEnoughSpace => StatusCode::INSUFFICIENT_STORAGE,
            MaxContentLengthExceeded => StatusCode::PAYLOAD_TOO_LARGE,
            UploadTimeout => StatusCode::REQUEST_TIMEOUT,
            UploadAbandoned => StatusCode::from_u16(499).unwrap(),
            ExpectedUpgrade => StatusCode::BAD_REQUEST,
            Throttled | ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            UnprocessableEntity(_) => StatusCode::UNPROCESSABLE_ENTITY,
            InternalError => StatusCode::INTERNAL_SERVER_ERROR,
            NotImplemented => StatusCode::NOT_IMPLEMENTED,
        }
    }

    /// Wraps any displayable collaborator error as `InternalError`, logging
    /// the real cause so it never reaches the client.
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        tracing::error!(error = %err, "internal error");
        AppError::InternalError
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    code: &'a str,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retry_after = matches!(self, AppError::ServiceUnavailable | AppError::NotEnoughSpace);
        let mut response = (
            status,
            Json(ErrorBody {
                code: self.rest_code(),
                message: self.to_string(),
            }),
        )
            .into_response();
        if retry_after {
            response
                .headers_mut()
                .insert("Retry-After", "30".parse().unwrap());
        }
        response
            .headers_mut()
            .insert("Server", axum::http::HeaderValue::from_static("Manta/2"));
        response
    }
}
