//! Type resolution.
//!
//! Result columns and statement parameters refer to types by OID. A
//! [`TypeRef`] is a shared handle that resolves its OID through a
//! [`TypeLoader`] on first use and keeps the answer. [`TypeCache`] hands out
//! one handle per OID so every column of the same type shares the resolution.

mod codec;

pub use codec::{
    BuiltinCodecs, Codec, CodecContext, CodecLookup, EncodedParams, Value, decode_value,
    encode_params, result_formats,
};
pub(crate) use codec::hex_decode;

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use crate::error::Result;
use crate::protocol::types::Oid;

/// Well-known built-in type OIDs.
pub mod oid {
    use super::Oid;

    pub const BOOL: Oid = 16;
    pub const BYTEA: Oid = 17;
    pub const NAME: Oid = 19;
    pub const INT8: Oid = 20;
    pub const INT2: Oid = 21;
    pub const INT4: Oid = 23;
    pub const TEXT: Oid = 25;
    pub const OID: Oid = 26;
    pub const FLOAT4: Oid = 700;
    pub const FLOAT8: Oid = 701;
    pub const UNKNOWN: Oid = 705;
    pub const BPCHAR: Oid = 1042;
    pub const VARCHAR: Oid = 1043;
}

/// A resolved type definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub oid: Oid,
    /// Type name as the server knows it, e.g. `int4`
    pub name: String,
    /// Element type for array types
    pub element: Option<Oid>,
}

impl TypeInfo {
    pub fn new(oid: Oid, name: impl Into<String>) -> Self {
        Self {
            oid,
            name: name.into(),
            element: None,
        }
    }
}

/// Source of type definitions, typically backed by `pg_type`.
pub trait TypeLoader: Send + Sync {
    /// Look up the definition of `oid`.
    fn load_type(&self, oid: Oid) -> Result<TypeInfo>;

    /// Forget anything cached about `oid` (after DDL changed it).
    fn refresh_type(&self, _oid: Oid) -> Result<()> {
        Ok(())
    }
}

/// Loader that knows the built-in scalar types.
///
/// Any other OID resolves to a placeholder named `unknown`, which the
/// built-in codecs handle as text.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinTypes;

impl TypeLoader for BuiltinTypes {
    fn load_type(&self, oid: Oid) -> Result<TypeInfo> {
        let name = match oid {
            oid::BOOL => "bool",
            oid::BYTEA => "bytea",
            oid::NAME => "name",
            oid::INT8 => "int8",
            oid::INT2 => "int2",
            oid::INT4 => "int4",
            oid::TEXT => "text",
            oid::OID => "oid",
            oid::FLOAT4 => "float4",
            oid::FLOAT8 => "float8",
            oid::BPCHAR => "bpchar",
            oid::VARCHAR => "varchar",
            _ => "unknown",
        };
        Ok(TypeInfo::new(oid, name))
    }
}

/// Lazily resolved, shareable handle to a type.
///
/// Clones share the same resolution slot. Two threads resolving at once may
/// both call the loader; the first stored value wins and both see it.
#[derive(Debug, Clone)]
pub struct TypeRef {
    oid: Oid,
    slot: Arc<OnceLock<Arc<TypeInfo>>>,
}

impl TypeRef {
    /// An unresolved handle for `oid`.
    pub fn new(oid: Oid) -> Self {
        Self {
            oid,
            slot: Arc::new(OnceLock::new()),
        }
    }

    pub fn oid(&self) -> Oid {
        self.oid
    }

    /// The resolved type, if resolution already happened.
    pub fn get(&self) -> Option<&Arc<TypeInfo>> {
        self.slot.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Resolve through `loader` unless already resolved.
    pub fn resolve(&self, loader: &dyn TypeLoader) -> Result<Arc<TypeInfo>> {
        if let Some(info) = self.slot.get() {
            return Ok(Arc::clone(info));
        }
        let info = Arc::new(loader.load_type(self.oid)?);
        Ok(Arc::clone(self.slot.get_or_init(|| info)))
    }
}

/// One [`TypeRef`] per OID, shared across queries and connections.
pub struct TypeCache {
    loader: Arc<dyn TypeLoader>,
    refs: RwLock<HashMap<Oid, TypeRef>>,
}

impl std::fmt::Debug for TypeCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeCache")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Default for TypeCache {
    fn default() -> Self {
        Self::new(Arc::new(BuiltinTypes))
    }
}

impl TypeCache {
    pub fn new(loader: Arc<dyn TypeLoader>) -> Self {
        Self {
            loader,
            refs: RwLock::new(HashMap::new()),
        }
    }

    pub fn loader(&self) -> &dyn TypeLoader {
        self.loader.as_ref()
    }

    /// The shared handle for `oid`, created unresolved on first request.
    pub fn get(&self, oid: Oid) -> TypeRef {
        if let Some(existing) = self
            .refs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&oid)
        {
            return existing.clone();
        }
        self.refs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(oid)
            .or_insert_with(|| TypeRef::new(oid))
            .clone()
    }

    /// Resolve a handle through this cache's loader.
    pub fn resolve(&self, type_ref: &TypeRef) -> Result<Arc<TypeInfo>> {
        type_ref.resolve(self.loader.as_ref())
    }

    /// Drop the cached resolution of `oid` and tell the loader to reload it.
    ///
    /// Handles given out earlier keep their old resolution; new calls to
    /// [`get`](Self::get) return a fresh handle.
    pub fn refresh(&self, oid: Oid) -> Result<()> {
        self.loader.refresh_type(oid)?;
        self.refs
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&oid);
        Ok(())
    }

    /// Number of OIDs with a handle.
    pub fn len(&self) -> usize {
        self.refs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Default)]
    struct CountingLoader {
        loads: AtomicUsize,
        refreshes: AtomicUsize,
    }

    impl TypeLoader for CountingLoader {
        fn load_type(&self, oid: Oid) -> Result<TypeInfo> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(TypeInfo::new(oid, format!("t{oid}")))
        }

        fn refresh_type(&self, _oid: Oid) -> Result<()> {
            self.refreshes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn resolution_is_lazy_and_cached() {
        let loader = Arc::new(CountingLoader::default());
        let cache = TypeCache::new(Arc::clone(&loader) as Arc<dyn TypeLoader>);

        let a = cache.get(23);
        let b = cache.get(23);
        assert!(!a.is_resolved());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);

        assert_eq!(cache.resolve(&a).unwrap().name, "t23");
        assert!(b.is_resolved());
        cache.resolve(&b).unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn refresh_hands_out_a_new_handle() {
        let loader = Arc::new(CountingLoader::default());
        let cache = TypeCache::new(Arc::clone(&loader) as Arc<dyn TypeLoader>);

        let old = cache.get(25);
        cache.resolve(&old).unwrap();
        cache.refresh(25).unwrap();
        assert_eq!(loader.refreshes.load(Ordering::SeqCst), 1);

        let new = cache.get(25);
        assert!(old.is_resolved());
        assert!(!new.is_resolved());
        cache.resolve(&new).unwrap();
        assert_eq!(loader.loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn concurrent_resolution_agrees() {
        let cache = Arc::new(TypeCache::default());
        let handle = cache.get(oid::INT8);
        let threads: Vec<_> = (0..4)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let handle = handle.clone();
                std::thread::spawn(move || cache.resolve(&handle).unwrap())
            })
            .collect();
        let resolved: Vec<Arc<TypeInfo>> =
            threads.into_iter().map(|t| t.join().unwrap()).collect();
        for info in &resolved {
            assert!(Arc::ptr_eq(info, &resolved[0]));
            assert_eq!(info.name, "int8");
        }
    }

    #[test]
    fn default_refresh_only_drops_the_handle() {
        let cache = TypeCache::default();
        let old = cache.get(oid::INT4);
        cache.resolve(&old).unwrap();
        cache.refresh(oid::INT4).unwrap();
        assert!(cache.is_empty());
        assert_eq!(cache.resolve(&cache.get(oid::INT4)).unwrap().name, "int4");
    }

    #[test]
    fn builtin_placeholder_for_unknown_oids() {
        let info = BuiltinTypes.load_type(3802).unwrap();
        assert_eq!(info.name, "unknown");
    }
}
