use crate::types::CUSTOM_HTTP_ERROR_CODE;

/// An extension trait to help determine if a URL check outcome warrants
/// another attempt.
///
/// A retryable code keeps the checker chain going and makes the HTTP
/// checker fall back from HEAD to GET. Codes below 300 are successes and
/// never retried.
pub(crate) trait RetryExt {
    fn should_retry(&self) -> bool;
}

impl RetryExt for u16 {
    fn should_retry(&self) -> bool {
        *self >= 300
            && matches!(
                *self,
                403 | 404 | 405 | 408 | 502 | 503 | 504 | CUSTOM_HTTP_ERROR_CODE
            )
    }
}
