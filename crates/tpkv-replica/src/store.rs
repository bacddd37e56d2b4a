use anyhow::Result;

/// The local storage backend owned by one replica node.
///
/// The commit protocol is implemented once over this trait; key/value and
/// file-blob deployments differ only in which implementation is plugged in.
pub trait LocalStore: Send + Sync + 'static {
    fn get(&self, key: &str) -> Result<Option<String>>;

    fn put(&self, key: &str, value: &str) -> Result<()>;

    /// Returns `false` if the key was already absent.
    fn delete(&self, key: &str) -> Result<bool>;

    /// Key ordering is unspecified; callers sort when determinism matters.
    fn list(&self) -> Result<Vec<String>>;
}
