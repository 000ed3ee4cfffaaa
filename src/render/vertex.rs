use bytemuck::{Pod, Zeroable};

/// One packed mesh vertex: position, texture coordinates, face normal and a
/// baked brightness byte. The layout has no padding, so whole staging arrays
/// can be byte-cast for upload.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub uv: [f32; 2],
    pub normal: [i8; 3],
    pub brightness: u8,
}

impl Vertex {
    pub fn new(position: [f32; 3], uv: [f32; 2], normal: [i8; 3], brightness: u8) -> Self {
        Self {
            position,
            uv,
            normal,
            brightness,
        }
    }

    pub fn as_bytes(slice: &[Vertex]) -> &[u8] {
        bytemuck::cast_slice(slice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_24_bytes_with_no_padding() {
        assert_eq!(std::mem::size_of::<Vertex>(), 24);
        let v = Vertex::new([1.0, 2.0, 3.0], [0.5, 0.5], [0, 0, 1], 255);
        assert_eq!(Vertex::as_bytes(&[v]).len(), 24);
    }
}
