//! Target capability descriptor.

/// Capabilities and layout constants of one compilation target.
///
/// The array header size is a target-wide constant: every global array buffer
/// is prefixed by this much metadata before its element data, and all lowered
/// address computations add it.
#[derive(Debug, Clone, PartialEq, Eq, bon::Builder)]
pub struct Target {
    /// Metadata prefix preceding element data in every global array buffer.
    #[builder(default = 24)]
    pub array_header_bytes: u64,

    /// Whether the packed dot-product-accumulate instruction is available.
    #[builder(default = true)]
    pub supports_dp4a: bool,

    /// Maximum global grid dimensionality.
    #[builder(default = 3)]
    pub max_global_dims: usize,

    /// Maximum local grid dimensionality.
    #[builder(default = 3)]
    pub max_local_dims: usize,

    /// Maximum work-items per group.
    #[builder(default = 1024)]
    pub max_local_size: usize,
}

impl Default for Target {
    fn default() -> Self {
        Self::builder().build()
    }
}
