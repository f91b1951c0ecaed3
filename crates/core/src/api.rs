use crate::error::SubmitError;
use crate::event::Listen;
use async_trait::async_trait;

/// Remote scrobble service. Implementations classify every failure as
/// transient or permanent; the submission queue decides what to do with it.
#[async_trait]
pub trait ScrobbleApi: Send + Sync {
    fn name(&self) -> &'static str;
    async fn submit_now_playing(&self, listen: &Listen) -> Result<(), SubmitError>;
    async fn submit_scrobble(&self, listen: &Listen) -> Result<(), SubmitError>;
}
