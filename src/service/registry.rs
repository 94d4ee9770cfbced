//! Service registry: names to atoms, atoms to handlers.
//!
//! Atoms are assigned sequentially starting from 1 (0 is "unaddressed"),
//! unless a service is registered at an explicit atom with
//! [`ServiceRegistry::register_at`]. Sequential assignment continues after
//! the highest atom in use. Atoms are only meaningful for the lifetime of
//! one session and are never persisted.
//!
//! # Example
//!
//! ```
//! use bytes::Bytes;
//! use guestwire::service::{ServiceContext, ServiceRegistry};
//!
//! let mut registry = ServiceRegistry::new();
//! let atom = registry
//!     .register("echo", 1, |payload: Bytes, ctx: &ServiceContext| ctx.send(&payload))
//!     .unwrap();
//!
//! assert_eq!(registry.resolve("echo").atom, atom);
//! assert_eq!(registry.resolve("missing").atom, 0);
//! ```

use std::collections::HashMap;

use bytes::Bytes;

use super::context::{wrap_message, Messenger, ServiceContext};
use crate::error::{GuestwireError, Result};
use crate::protocol::{ServiceInfo, MAX_FRAME_SIZE, MAX_SERVICES};

/// Handler for inbound messages addressed to one service.
pub trait ServiceHandler: Send + 'static {
    /// Handle one inbound message payload (atom prefix already removed).
    ///
    /// An error is fatal to the session.
    fn handle(&mut self, payload: Bytes, ctx: &ServiceContext) -> Result<()>;
}

impl<F> ServiceHandler for F
where
    F: FnMut(Bytes, &ServiceContext) -> Result<()> + Send + 'static,
{
    fn handle(&mut self, payload: Bytes, ctx: &ServiceContext) -> Result<()> {
        self(payload, ctx)
    }
}

/// Registry mapping service names to descriptors and atoms to handlers.
pub struct ServiceRegistry {
    /// Descriptors by name.
    services: HashMap<String, ServiceInfo>,
    /// Atom to name mapping (for re-resolution).
    atom_to_name: HashMap<u32, String>,
    /// One handler per atom.
    handlers: HashMap<u32, Box<dyn ServiceHandler>>,
    /// Next atom to assign.
    next_atom: u32,
    max_frame_size: usize,
}

impl ServiceRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            services: HashMap::new(),
            atom_to_name: HashMap::new(),
            handlers: HashMap::new(),
            next_atom: 1,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Bound outgoing frames to `max_frame_size` bytes.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size.min(MAX_FRAME_SIZE);
        self
    }

    /// Declare a service without a handler yet.
    ///
    /// Declaring an existing name keeps its atom and updates the version.
    pub fn declare(&mut self, name: &str, version: u32) -> Result<u32> {
        if let Some(info) = self.services.get_mut(name) {
            info.version = version;
            return Ok(info.atom);
        }

        self.check_capacity(name)?;
        let atom = self.next_atom;
        if self.atom_to_name.contains_key(&atom) {
            return Err(GuestwireError::Config(format!(
                "cannot register service {:?}: no atom left",
                name
            )));
        }

        self.insert(atom, name, version);
        Ok(atom)
    }

    /// Declare a service at a fixed `atom`.
    ///
    /// Fails for atom 0, for an atom held by another name, and for a name
    /// already declared at a different atom.
    pub fn declare_at(&mut self, atom: u32, name: &str, version: u32) -> Result<()> {
        if atom == 0 {
            return Err(GuestwireError::Config(format!(
                "cannot register service {:?} at atom 0",
                name
            )));
        }
        if let Some(info) = self.services.get_mut(name) {
            if info.atom != atom {
                return Err(GuestwireError::Config(format!(
                    "service {:?} already has atom {}",
                    name, info.atom
                )));
            }
            info.version = version;
            return Ok(());
        }
        if let Some(owner) = self.atom_to_name.get(&atom) {
            return Err(GuestwireError::Config(format!(
                "atom {} already belongs to service {:?}",
                atom, owner
            )));
        }

        self.check_capacity(name)?;
        self.insert(atom, name, version);
        Ok(())
    }

    /// Register a service with its handler, returning the assigned atom.
    pub fn register<H: ServiceHandler>(&mut self, name: &str, version: u32, handler: H) -> Result<u32> {
        let atom = self.declare(name, version)?;
        self.register_handler(atom, handler);
        Ok(atom)
    }

    /// Register a service with its handler at a fixed `atom`.
    pub fn register_at<H: ServiceHandler>(
        &mut self,
        atom: u32,
        name: &str,
        version: u32,
        handler: H,
    ) -> Result<()> {
        self.declare_at(atom, name, version)?;
        self.register_handler(atom, handler);
        Ok(())
    }

    /// Associate `handler` with `atom`, replacing any previous handler.
    pub fn register_handler<H: ServiceHandler>(&mut self, atom: u32, handler: H) {
        self.handlers.insert(atom, Box::new(handler));
    }

    /// Resolve a service name (exact, case-sensitive).
    ///
    /// Unknown names resolve to [`ServiceInfo::UNAVAILABLE`].
    pub fn resolve(&self, name: &str) -> ServiceInfo {
        self.services
            .get(name)
            .copied()
            .unwrap_or(ServiceInfo::UNAVAILABLE)
    }

    /// Look a descriptor up by atom.
    pub fn lookup(&self, atom: u32) -> Option<ServiceInfo> {
        self.atom_to_name
            .get(&atom)
            .and_then(|name| self.services.get(name))
            .copied()
    }

    /// Get a service name by atom.
    pub fn name(&self, atom: u32) -> Option<&str> {
        self.atom_to_name.get(&atom).map(|s| s.as_str())
    }

    /// Number of declared services.
    pub fn len(&self) -> usize {
        self.services.len()
    }

    /// Check if no services are declared.
    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    /// Dispatch an inbound message to the handler registered for `atom`.
    ///
    /// Returns `Ok(false)` if no handler is registered; the caller decides
    /// what that means for the session.
    pub fn dispatch(&mut self, atom: u32, payload: Bytes, messenger: &Messenger) -> Result<bool> {
        let handler = match self.handlers.get_mut(&atom) {
            Some(h) => h,
            None => return Ok(false),
        };

        let ctx = ServiceContext::new(atom, messenger.clone());
        handler.handle(payload, &ctx)?;
        Ok(true)
    }

    fn check_capacity(&self, name: &str) -> Result<()> {
        if self.services.len() >= MAX_SERVICES {
            return Err(GuestwireError::Config(format!(
                "cannot register service {:?}: at most {} services per session",
                name, MAX_SERVICES
            )));
        }
        Ok(())
    }

    fn insert(&mut self, atom: u32, name: &str, version: u32) {
        self.services
            .insert(name.to_string(), ServiceInfo::new(atom, version));
        self.atom_to_name.insert(atom, name.to_string());
        self.next_atom = self.next_atom.max(atom.saturating_add(1));
    }

    /// Build a MESSAGE event frame for `atom`.
    ///
    /// Fails for atom 0 and for payloads that do not fit in one frame.
    pub fn wrap_outgoing(&self, atom: u32, payload: &[u8]) -> Result<Bytes> {
        wrap_message(atom, payload, self.max_frame_size)
    }
}

impl Default for ServiceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services)
            .field("handlers", &self.handlers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn noop(_: Bytes, _: &ServiceContext) -> Result<()> {
        Ok(())
    }

    #[test]
    fn test_atoms_assigned_sequentially() {
        let mut registry = ServiceRegistry::new();

        assert_eq!(registry.register("kv", 1, noop).unwrap(), 1);
        assert_eq!(registry.register("log", 2, noop).unwrap(), 2);
        assert_eq!(registry.resolve("kv"), ServiceInfo::new(1, 1));
        assert_eq!(registry.resolve("log"), ServiceInfo::new(2, 2));
        assert_eq!(registry.name(2), Some("log"));
    }

    #[test]
    fn test_resolve_is_exact_and_case_sensitive() {
        let mut registry = ServiceRegistry::new();
        registry.register("kv", 1, noop).unwrap();

        assert_eq!(registry.resolve("KV"), ServiceInfo::UNAVAILABLE);
        assert_eq!(registry.resolve("kv "), ServiceInfo::UNAVAILABLE);
        assert_eq!(registry.resolve(""), ServiceInfo::UNAVAILABLE);
    }

    #[test]
    fn test_redeclare_keeps_atom() {
        let mut registry = ServiceRegistry::new();
        let atom = registry.register("kv", 1, noop).unwrap();
        let again = registry.register("kv", 4, noop).unwrap();

        assert_eq!(atom, again);
        assert_eq!(registry.resolve("kv").version, 4);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_matches_resolve() {
        let mut registry = ServiceRegistry::new();
        registry.register("a", 3, noop).unwrap();
        registry.register("b", 5, noop).unwrap();

        for name in ["a", "b"] {
            let info = registry.resolve(name);
            assert_eq!(registry.lookup(info.atom), Some(info));
        }
        assert_eq!(registry.lookup(0), None);
    }

    #[test]
    fn test_service_limit() {
        let mut registry = ServiceRegistry::new();
        for i in 0..MAX_SERVICES {
            registry.declare(&format!("svc{}", i), 1).unwrap();
        }

        let err = registry.declare("one-too-many", 1).unwrap_err();
        assert!(matches!(err, GuestwireError::Config(_)));
        // Existing names can still be updated.
        assert!(registry.declare("svc0", 2).is_ok());
    }

    #[test]
    fn test_fixed_atoms() {
        let mut registry = ServiceRegistry::new();
        registry.register_at(7, "kv", 1, noop).unwrap();
        registry.register_at(9, "log", 2, noop).unwrap();

        assert_eq!(registry.resolve("kv"), ServiceInfo::new(7, 1));
        assert_eq!(registry.resolve("log"), ServiceInfo::new(9, 2));
        assert_eq!(registry.lookup(9), Some(ServiceInfo::new(9, 2)));
        // Sequential assignment continues past the highest atom.
        assert_eq!(registry.register("next", 1, noop).unwrap(), 10);
    }

    #[test]
    fn test_fixed_atom_conflicts() {
        let mut registry = ServiceRegistry::new();
        registry.register_at(3, "kv", 1, noop).unwrap();

        assert!(matches!(
            registry.declare_at(0, "zero", 1),
            Err(GuestwireError::Config(_))
        ));
        assert!(matches!(
            registry.declare_at(3, "other", 1),
            Err(GuestwireError::Config(_))
        ));
        assert!(matches!(
            registry.declare_at(4, "kv", 1),
            Err(GuestwireError::Config(_))
        ));

        registry.declare_at(3, "kv", 5).unwrap();
        assert_eq!(registry.resolve("kv"), ServiceInfo::new(3, 5));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_sequential_after_fixed_atom() {
        let mut registry = ServiceRegistry::new();
        assert_eq!(registry.register("a", 1, noop).unwrap(), 1);
        registry.register_at(2, "b", 1, noop).unwrap();
        assert_eq!(registry.register("c", 1, noop).unwrap(), 3);
    }

    #[test]
    fn test_dispatch_without_handler() {
        let mut registry = ServiceRegistry::new();
        let atom = registry.declare("quiet", 1).unwrap();
        let (messenger, _rx) = Messenger::default_channel();

        assert!(!registry.dispatch(atom, Bytes::new(), &messenger).unwrap());
        assert!(!registry.dispatch(99, Bytes::new(), &messenger).unwrap());
    }

    #[test]
    fn test_dispatch_invokes_handler() {
        let mut registry = ServiceRegistry::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let atom = registry
            .register("rec", 1, move |payload: Bytes, _ctx: &ServiceContext| -> Result<()> {
                sink.lock().unwrap().push(payload);
                Ok(())
            })
            .unwrap();
        let (messenger, _rx) = Messenger::default_channel();

        assert!(registry
            .dispatch(atom, Bytes::from_static(b"hi"), &messenger)
            .unwrap());
        assert_eq!(seen.lock().unwrap().as_slice(), &[Bytes::from_static(b"hi")]);
    }

    #[test]
    fn test_reregister_handler_overwrites() {
        let mut registry = ServiceRegistry::new();
        let atom = registry.register("svc", 1, noop).unwrap();
        registry.register_handler(atom, |_: Bytes, _: &ServiceContext| -> Result<()> {
            Err(GuestwireError::protocol("replaced"))
        });
        let (messenger, _rx) = Messenger::default_channel();

        let err = registry.dispatch(atom, Bytes::new(), &messenger).unwrap_err();
        assert!(err.to_string().contains("replaced"));
    }

    #[test]
    fn test_handler_reply_goes_through_messenger() {
        let mut registry = ServiceRegistry::new();
        let atom = registry
            .register("echo", 1, |payload: Bytes, ctx: &ServiceContext| ctx.send(&payload))
            .unwrap();
        let (messenger, mut rx) = Messenger::default_channel();

        registry
            .dispatch(atom, Bytes::from_static(b"ping"), &messenger)
            .unwrap();

        let frame = rx.try_recv().unwrap();
        assert_eq!(frame, registry.wrap_outgoing(atom, b"ping").unwrap());
    }

    #[test]
    fn test_wrap_outgoing_rejects_atom_zero() {
        let registry = ServiceRegistry::new();
        assert!(registry.wrap_outgoing(0, b"x").is_err());
    }
}
