/// Determines what happens when a pool is dropped while blocks are still allocated.
///
/// By default, the pool releases its memory regardless of outstanding handles.
///
/// # Examples
///
/// ```
/// use handle_pool::{DropPolicy, HandlePool};
///
/// let pool = HandlePool::builder()
///     .total_size(16 * 1024)
///     .block_size(64)
///     .drop_policy(DropPolicy::MustNotDropBlocks)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[non_exhaustive]
pub enum DropPolicy {
    /// The pool releases its memory even if blocks are still allocated. This is the default.
    #[default]
    MayDropBlocks,

    /// The pool will panic if any block is still allocated when it is dropped.
    ///
    /// This may be valuable when raw pointers obtained from
    /// [`resolve_pointer()`][crate::HandlePool::resolve_pointer] are held by code that must
    /// release its blocks before the pool goes away.
    MustNotDropBlocks,
}
