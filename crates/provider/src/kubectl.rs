//! Attach mode: use whatever cluster the user's current kubeconfig context points at.
//! The cluster is not ours, so lifecycle ownership calls are refused.

use deck_core::KubeconfigHandle;

use crate::{Provider, ProviderArgs, ProviderError, ToolVersion};

pub const TAG: &str = "kubectlctx";

pub struct KubectlCtx {
    context: Option<String>,
}

impl KubectlCtx {
    /// `context` pins a kubeconfig context; `None` follows the current one.
    pub fn new(context: Option<String>) -> Self { Self { context } }

    pub(crate) fn boxed(args: ProviderArgs) -> Result<Box<dyn Provider>, ProviderError> {
        let context = args
            .native_config
            .as_ref()
            .and_then(|n| n.get("context"))
            .and_then(|c| c.as_str())
            .map(str::to_string);
        Ok(Box::new(Self::new(context)))
    }

    fn refuse(operation: &'static str) -> ProviderError {
        ProviderError::NotSupported { provider: TAG.to_string(), operation }
    }
}

#[async_trait::async_trait]
impl Provider for KubectlCtx {
    fn tag(&self) -> &'static str { TAG }

    fn cluster_name(&self) -> &str { self.context.as_deref().unwrap_or("current-context") }

    async fn exists(&self) -> Result<bool, ProviderError> { Ok(true) }

    async fn create(&self) -> Result<(), ProviderError> { Err(Self::refuse("create")) }

    async fn start(&self) -> Result<(), ProviderError> { Ok(()) }

    async fn stop(&self) -> Result<(), ProviderError> { Ok(()) }

    async fn delete(&self) -> Result<(), ProviderError> { Err(Self::refuse("delete")) }

    async fn get_kubeconfig(&self) -> Result<KubeconfigHandle, ProviderError> {
        Ok(KubeconfigHandle::CurrentContext { context: self.context.clone() })
    }

    async fn version(&self) -> Result<ToolVersion, ProviderError> { Err(Self::refuse("version")) }

    async fn install(&self) -> Result<(), ProviderError> { Err(Self::refuse("install")) }

    async fn update(&self) -> Result<(), ProviderError> { Err(Self::refuse("update")) }

    fn ports(&self) -> Vec<String> { Vec::new() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refuses_ownership_operations() {
        let p = KubectlCtx::new(None);
        assert!(p.exists().await.unwrap());
        assert!(p.create().await.unwrap_err().is_not_supported());
        assert!(p.delete().await.unwrap_err().is_not_supported());
        assert!(p.install().await.unwrap_err().is_not_supported());
        assert!(p.version().await.unwrap_err().is_not_supported());
        p.stop().await.unwrap();
        assert!(!p.start_or_create().await.unwrap());
        assert_eq!(p.get_kubeconfig().await.unwrap(), KubeconfigHandle::CurrentContext { context: None });
    }
}
