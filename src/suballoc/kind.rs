use ash::vk;

/// What a suballocation is used for.
///
/// The declaration order is significant: the granularity table is looked up
/// with the pair sorted by it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SuballocationKind {
    Free,
    Unknown,
    Buffer,
    ImageUnknown,
    ImageLinear,
    ImageOptimal,
}

impl SuballocationKind {
    pub const ALL: [SuballocationKind; 6] = [
        SuballocationKind::Free,
        SuballocationKind::Unknown,
        SuballocationKind::Buffer,
        SuballocationKind::ImageUnknown,
        SuballocationKind::ImageLinear,
        SuballocationKind::ImageOptimal,
    ];

    pub fn is_free(self) -> bool {
        self == SuballocationKind::Free
    }
}

impl From<vk::ImageTiling> for SuballocationKind {
    fn from(tiling: vk::ImageTiling) -> Self {
        match tiling {
            vk::ImageTiling::OPTIMAL => SuballocationKind::ImageOptimal,
            vk::ImageTiling::LINEAR => SuballocationKind::ImageLinear,
            _ => SuballocationKind::ImageUnknown,
        }
    }
}

/// Returns `true` if resources of kind `a` and `b` must not share a
/// `bufferImageGranularity` page.
pub fn is_buffer_image_granularity_conflict(a: SuballocationKind, b: SuballocationKind) -> bool {
    use SuballocationKind::*;

    let (first, second) = if a > b { (b, a) } else { (a, b) };

    match first {
        Free => false,
        Unknown => true,
        Buffer => matches!(second, ImageUnknown | ImageOptimal),
        ImageUnknown => matches!(second, ImageUnknown | ImageLinear | ImageOptimal),
        ImageLinear => second == ImageOptimal,
        ImageOptimal => false,
    }
}
