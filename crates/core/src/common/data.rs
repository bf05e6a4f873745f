//! Memory operation classification shared by the LDQ/STQ and the
//! cache/TLB opaque interface.

/// The kind of memory operation an `enqueue` call into the cache/TLB
/// interface represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemOp {
    /// A load uop's data access.
    Load,
    /// A store uop's data access (the std half, at commit/drain time).
    Store,
    /// A DTLB translation request, issued alongside the data access.
    Translate,
}
