use composer::{BufferSize, UniformValue, Uniforms};

/// Byte size of the leading `vec4 _resolution` every stage block starts with.
pub(crate) const RESOLUTION_BYTES: usize = 16;

/// `(width, height, 1/width, 1/height)` of the pass output.
pub(crate) fn resolution(size: BufferSize) -> [f32; 4] {
    let width = size.width.max(1) as f32;
    let height = size.height.max(1) as f32;
    [width, height, 1.0 / width, 1.0 / height]
}

/// std140 alignment and size of a block member, or `None` for textures,
/// which are bound separately.
fn std140_slot(value: &UniformValue) -> Option<(usize, usize)> {
    match value {
        UniformValue::Float(_) => Some((4, 4)),
        UniformValue::Vec2(_) => Some((8, 8)),
        UniformValue::Vec3(_) => Some((16, 12)),
        UniformValue::Texture(_) => None,
    }
}

fn align_to(offset: usize, alignment: usize) -> usize {
    offset.div_ceil(alignment) * alignment
}

/// Packs a stage's ordered uniforms into a std140 block matching the GLSL
/// generated by `compile::stage_uniform_block`.
pub(crate) fn pack_std140(resolution: [f32; 4], uniforms: &Uniforms) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(block_size(uniforms));
    bytes.extend_from_slice(bytemuck::cast_slice(&resolution));

    for (_, value) in uniforms.iter() {
        let Some((alignment, _)) = std140_slot(value) else {
            continue;
        };
        bytes.resize(align_to(bytes.len(), alignment), 0);
        match value {
            UniformValue::Float(v) => bytes.extend_from_slice(bytemuck::bytes_of(v)),
            UniformValue::Vec2(v) => bytes.extend_from_slice(bytemuck::cast_slice(v)),
            UniformValue::Vec3(v) => bytes.extend_from_slice(bytemuck::cast_slice(v)),
            UniformValue::Texture(_) => {}
        }
    }

    bytes.resize(align_to(bytes.len(), 16), 0);
    bytes
}

/// Size in bytes of the block `pack_std140` produces for these uniforms.
pub(crate) fn block_size(uniforms: &Uniforms) -> usize {
    let end = uniforms
        .iter()
        .filter_map(|(_, value)| std140_slot(value))
        .fold(RESOLUTION_BYTES, |offset, (alignment, size)| {
            align_to(offset, alignment) + size
        });
    align_to(end, 16)
}

#[cfg(test)]
mod tests {
    use super::*;
    use composer::TextureId;

    fn floats(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes(chunk.try_into().unwrap()))
            .collect()
    }

    #[test]
    fn members_follow_std140_alignment() {
        let uniforms = Uniforms::new()
            .with("a", UniformValue::Float(1.0))
            .with("b", UniformValue::Vec3([2.0, 3.0, 4.0]))
            .with("c", UniformValue::Vec2([5.0, 6.0]))
            .with("d", UniformValue::Float(7.0));
        let bytes = pack_std140([8.0, 4.0, 0.125, 0.25], &uniforms);
        assert_eq!(bytes.len(), 64);
        assert_eq!(bytes.len(), block_size(&uniforms));

        let values = floats(&bytes);
        assert_eq!(&values[0..4], &[8.0, 4.0, 0.125, 0.25]);
        assert_eq!(values[4], 1.0);
        assert_eq!(&values[8..11], &[2.0, 3.0, 4.0]);
        assert_eq!(&values[12..14], &[5.0, 6.0]);
        assert_eq!(values[14], 7.0);
    }

    #[test]
    fn float_packs_into_vec3_tail() {
        let uniforms = Uniforms::new()
            .with("tint", UniformValue::Vec3([0.1, 0.2, 0.3]))
            .with("strength", UniformValue::Float(0.5));
        let values = floats(&pack_std140([0.0; 4], &uniforms));
        assert_eq!(values.len(), 8);
        assert_eq!(values[7], 0.5);
    }

    #[test]
    fn textures_take_no_block_space() {
        let uniforms = Uniforms::new()
            .with("map", UniformValue::Texture(Some(TextureId(3))))
            .with("strength", UniformValue::Float(0.1));
        let bytes = pack_std140([0.0; 4], &uniforms);
        assert_eq!(bytes.len(), 32);
        assert_eq!(floats(&bytes)[4], 0.1);
    }

    #[test]
    fn empty_block_holds_only_resolution() {
        assert_eq!(block_size(&Uniforms::new()), RESOLUTION_BYTES);
        let size = BufferSize::new(200, 100);
        assert_eq!(resolution(size), [200.0, 100.0, 0.005, 0.01]);
    }
}
