use std::collections::HashMap;

/// What the resolver needs to know about a deployment method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub id: String,
    pub name: String,
    /// Whether an instance that did not deploy the files can remove them
    /// by comparing modification times.
    pub fallback_purge_safe: bool,
}

/// Lookup of deployment methods by the id recorded in a manifest.
pub trait MethodRegistry {
    fn lookup(&self, id: &str) -> Option<MethodInfo>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SigilLinkMode {
    Hardlink,
    Symlink,
}

impl SigilLinkMode {
    pub fn label(self) -> &'static str {
        match self {
            SigilLinkMode::Hardlink => "hardlink",
            SigilLinkMode::Symlink => "symlink",
        }
    }

    pub fn method_id(self) -> &'static str {
        match self {
            SigilLinkMode::Hardlink => "sigillink_hardlink",
            SigilLinkMode::Symlink => "sigillink_symlink",
        }
    }

    // Hardlinks share the inode with the cache copy, so the mtime in the
    // game folder moves whenever the cache is touched.
    fn fallback_purge_safe(self) -> bool {
        match self {
            SigilLinkMode::Hardlink => false,
            SigilLinkMode::Symlink => true,
        }
    }
}

pub const COPY_METHOD_ID: &str = "copy";

#[derive(Debug, Clone, Default)]
pub struct MethodTable {
    methods: HashMap<String, MethodInfo>,
}

impl MethodTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The methods SigilSmith deploys with.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        for mode in [SigilLinkMode::Symlink, SigilLinkMode::Hardlink] {
            table.register(MethodInfo {
                id: mode.method_id().to_string(),
                name: format!("SigilLink ({})", mode.label()),
                fallback_purge_safe: mode.fallback_purge_safe(),
            });
        }
        table.register(MethodInfo {
            id: COPY_METHOD_ID.to_string(),
            name: "Copy".to_string(),
            fallback_purge_safe: true,
        });
        table
    }

    pub fn register(&mut self, info: MethodInfo) {
        self.methods.insert(info.id.clone(), info);
    }

    pub fn with(mut self, id: &str, fallback_purge_safe: bool) -> Self {
        self.register(MethodInfo {
            id: id.to_string(),
            name: id.to_string(),
            fallback_purge_safe,
        });
        self
    }
}

impl MethodRegistry for MethodTable {
    fn lookup(&self, id: &str) -> Option<MethodInfo> {
        self.methods.get(id).cloned()
    }
}

impl<T: MethodRegistry + ?Sized> MethodRegistry for &T {
    fn lookup(&self, id: &str) -> Option<MethodInfo> {
        (**self).lookup(id)
    }
}
