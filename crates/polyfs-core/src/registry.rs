//! Scheme → provider registry.
//!
//! A scheme binds to at most one provider. Registration subscribes to
//! the provider's event sources and re-emits them through the service
//! bus; the forwarding tasks are torn down when the registration handle
//! is disposed or the scheme is unregistered.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use polyfs_types::{
    Capabilities, CapabilityChangeEvent, FileError, FileErrorKind, FileResult,
    RegistrationEvent, Resource,
};
use tokio::task::JoinHandle;

use crate::events::EventBus;
use crate::provider::FileSystemProvider;

/// A party that joins provider activation, typically to lazily register
/// the provider for a scheme on first use.
#[async_trait]
pub trait ActivationParticipant: Send + Sync {
    async fn join_activation(&self, scheme: &str);
}

struct Registered {
    provider: Arc<dyn FileSystemProvider>,
    forwarders: Vec<JoinHandle<()>>,
}

impl Drop for Registered {
    fn drop(&mut self) {
        for task in &self.forwarders {
            task.abort();
        }
    }
}

pub struct ProviderRegistry {
    providers: Mutex<HashMap<String, Registered>>,
    participants: Mutex<Vec<Arc<dyn ActivationParticipant>>>,
    events: Arc<EventBus>,
}

impl ProviderRegistry {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            providers: Mutex::new(HashMap::new()),
            participants: Mutex::new(Vec::new()),
            events,
        }
    }

    /// Bind `provider` to `scheme`. Fails if the scheme is already
    /// bound. Disposing the returned handle unregisters the provider.
    pub fn register(
        self: &Arc<Self>,
        scheme: &str,
        provider: Arc<dyn FileSystemProvider>,
    ) -> FileResult<RegistrationHandle> {
        {
            let mut providers = self.providers.lock().unwrap();
            if providers.contains_key(scheme) {
                return Err(FileError::new(
                    FileErrorKind::Unknown,
                    format!("a provider for the scheme '{scheme}' is already registered"),
                ));
            }

            let forwarders = self.spawn_forwarders(scheme, &provider);
            providers.insert(
                scheme.to_string(),
                Registered {
                    provider,
                    forwarders,
                },
            );
        }

        self.events.emit_registration(RegistrationEvent {
            scheme: scheme.to_string(),
            added: true,
        });

        Ok(RegistrationHandle {
            scheme: scheme.to_string(),
            registry: Arc::downgrade(self),
            disposed: false,
        })
    }

    fn spawn_forwarders(
        &self,
        scheme: &str,
        provider: &Arc<dyn FileSystemProvider>,
    ) -> Vec<JoinHandle<()>> {
        use tokio::sync::broadcast::error::RecvError;

        let mut tasks = Vec::with_capacity(3);

        let mut changes = provider.events().subscribe_changes();
        let bus = self.events.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(batch) => bus.emit_changes(batch),
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("dropped {n} file change batches");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }));

        let mut capabilities = provider.events().subscribe_capabilities();
        let bus = self.events.clone();
        let scheme_name = scheme.to_string();
        tasks.push(tokio::spawn(async move {
            loop {
                match capabilities.recv().await {
                    Ok(capabilities) => bus.emit_capability_change(CapabilityChangeEvent {
                        scheme: scheme_name.clone(),
                        capabilities,
                    }),
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        }));

        let mut errors = provider.events().subscribe_errors();
        let bus = self.events.clone();
        tasks.push(tokio::spawn(async move {
            loop {
                match errors.recv().await {
                    Ok(message) => {
                        bus.emit_error(FileError::new(FileErrorKind::Unknown, message));
                    }
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        }));

        tasks
    }

    /// Remove the binding for `scheme`, tearing down its event
    /// forwarding. Returns whether a provider was bound.
    pub fn unregister(&self, scheme: &str) -> bool {
        let removed = self.providers.lock().unwrap().remove(scheme);
        match removed {
            Some(_) => {
                self.events.emit_registration(RegistrationEvent {
                    scheme: scheme.to_string(),
                    added: false,
                });
                true
            }
            None => false,
        }
    }

    pub fn register_activation_participant(&self, participant: Arc<dyn ActivationParticipant>) {
        self.participants.lock().unwrap().push(participant);
    }

    /// Fire will-activate and wait for every participant to settle.
    /// Whether a provider is registered afterwards is the caller's
    /// concern; lookup decides.
    pub async fn activate(&self, scheme: &str) {
        let participants: Vec<_> = self.participants.lock().unwrap().clone();
        for participant in participants {
            participant.join_activation(scheme).await;
        }
    }

    pub fn provider(&self, scheme: &str) -> Option<Arc<dyn FileSystemProvider>> {
        self.providers
            .lock()
            .unwrap()
            .get(scheme)
            .map(|r| r.provider.clone())
    }

    pub fn has_provider(&self, scheme: &str) -> bool {
        self.providers.lock().unwrap().contains_key(scheme)
    }

    /// Activate the scheme and return its provider, failing `NoProvider`
    /// when none is registered and `FileInvalidPath` for resources
    /// without an absolute path.
    pub async fn with_provider(
        &self,
        resource: &Resource,
    ) -> FileResult<Arc<dyn FileSystemProvider>> {
        if !resource.has_absolute_path() {
            return Err(FileError::invalid_path(resource));
        }

        self.activate(resource.scheme()).await;

        self.provider(resource.scheme())
            .ok_or_else(|| FileError::no_provider(resource))
    }

    pub fn can_handle_resource(&self, resource: &Resource) -> bool {
        self.has_provider(resource.scheme())
    }

    pub fn has_capability(&self, resource: &Resource, capability: Capabilities) -> bool {
        self.provider(resource.scheme())
            .is_some_and(|p| p.capabilities().contains(capability))
    }

    pub fn list_capabilities(&self) -> Vec<(String, Capabilities)> {
        let providers = self.providers.lock().unwrap();
        let mut out: Vec<_> = providers
            .iter()
            .map(|(scheme, r)| (scheme.clone(), r.provider.capabilities()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    /// Unregister everything.
    pub fn dispose(&self) {
        let schemes: Vec<String> = self.providers.lock().unwrap().keys().cloned().collect();
        for scheme in schemes {
            self.unregister(&scheme);
        }
    }
}

/// Handle returned by [`ProviderRegistry::register`]. Disposing (or
/// dropping) it unregisters the provider.
#[derive(Debug)]
pub struct RegistrationHandle {
    scheme: String,
    registry: Weak<ProviderRegistry>,
    disposed: bool,
}

impl RegistrationHandle {
    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn dispose(mut self) {
        self.release();
    }

    /// Keep the registration alive for the registry's lifetime instead
    /// of tying it to this handle.
    pub fn forget(mut self) {
        self.disposed = true;
    }

    fn release(&mut self) {
        if !self.disposed {
            self.disposed = true;
            if let Some(registry) = self.registry.upgrade() {
                registry.unregister(&self.scheme);
            }
        }
    }
}

impl Drop for RegistrationHandle {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MemConfig, MemProvider};

    fn registry() -> Arc<ProviderRegistry> {
        Arc::new(ProviderRegistry::new(Arc::new(EventBus::new())))
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = registry();
        let handle = registry
            .register("mem", Arc::new(MemProvider::new()))
            .unwrap();

        let resource = Resource::parse("mem:///a").unwrap();
        assert!(registry.with_provider(&resource).await.is_ok());
        handle.forget();
    }

    #[tokio::test]
    async fn test_duplicate_registration_fails() {
        let registry = registry();
        let _handle = registry
            .register("mem", Arc::new(MemProvider::new()))
            .unwrap();

        let err = registry
            .register("mem", Arc::new(MemProvider::new()))
            .unwrap_err();
        assert_eq!(err.kind(), FileErrorKind::Unknown);
        assert!(err.to_string().contains("already registered"));
    }

    #[tokio::test]
    async fn test_unknown_scheme_fails_no_provider() {
        let registry = registry();
        let resource = Resource::parse("nope:///a").unwrap();
        let err = registry.with_provider(&resource).await.err().unwrap();
        assert_eq!(err.kind(), FileErrorKind::NoProvider);
    }

    #[tokio::test]
    async fn test_handle_drop_unregisters() {
        let registry = registry();
        {
            let _handle = registry
                .register("mem", Arc::new(MemProvider::new()))
                .unwrap();
            assert!(registry.has_provider("mem"));
        }
        assert!(!registry.has_provider("mem"));
    }

    #[tokio::test]
    async fn test_activation_participant_can_register() {
        struct LazyRegistrar {
            registry: Mutex<Option<Arc<ProviderRegistry>>>,
        }

        #[async_trait]
        impl ActivationParticipant for LazyRegistrar {
            async fn join_activation(&self, scheme: &str) {
                if scheme == "lazy" {
                    let registry = self.registry.lock().unwrap().clone();
                    if let Some(registry) = registry {
                        if !registry.has_provider("lazy") {
                            registry
                                .register("lazy", Arc::new(MemProvider::new()))
                                .unwrap()
                                .forget();
                        }
                    }
                }
            }
        }

        let registry = registry();
        registry.register_activation_participant(Arc::new(LazyRegistrar {
            registry: Mutex::new(Some(registry.clone())),
        }));

        let resource = Resource::parse("lazy:///x").unwrap();
        assert!(registry.with_provider(&resource).await.is_ok());
    }

    #[tokio::test]
    async fn test_capability_events_forwarded_with_scheme() {
        let events = Arc::new(EventBus::new());
        let registry = Arc::new(ProviderRegistry::new(events.clone()));
        let provider = Arc::new(MemProvider::new());
        let _handle = registry.register("mem", provider.clone()).unwrap();

        let mut rx = events.subscribe_capability_changes();
        provider.set_capabilities(MemConfig::default().capabilities | Capabilities::READONLY);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.scheme, "mem");
        assert!(event.capabilities.is_readonly());
    }
}
