use std::borrow::Cow;
use std::fmt::Write as _;

use anyhow::{bail, Result};
use composer::{EffectKind, UniformValue, Uniforms};
use wgpu::naga::ShaderStage;

/// Name of the texture every effect reads its input from.
pub(crate) const INPUT_TEXTURE: &str = "tDiffuse";

/// Compiles the static full-screen triangle vertex shader.
pub(crate) fn compile_vertex_shader(device: &wgpu::Device) -> Result<wgpu::ShaderModule> {
    compile(device, "fullscreen triangle vertex", VERTEX_SHADER_GLSL.into(), ShaderStage::Vertex)
}

/// Compiles a generated fragment program, turning validation failures into errors.
pub(crate) fn compile_fragment_shader(
    device: &wgpu::Device,
    label: &str,
    source: String,
) -> Result<wgpu::ShaderModule> {
    tracing::trace!(label, lines = source.lines().count(), "compiling fragment program");
    compile(device, label, source, ShaderStage::Fragment)
}

fn compile(
    device: &wgpu::Device,
    label: &str,
    source: String,
    stage: ShaderStage,
) -> Result<wgpu::ShaderModule> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(source),
            stage,
            defines: &[],
        },
    });
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        bail!("failed to compile shader '{label}': {error}");
    }
    Ok(module)
}

/// Texture uniforms of a stage in binding order, after the input texture.
pub(crate) fn texture_uniforms(uniforms: &Uniforms) -> Vec<&str> {
    uniforms
        .iter()
        .filter(|(_, value)| matches!(value, UniformValue::Texture(_)))
        .map(|(name, _)| name)
        .collect()
}

/// std140 block declaration for a stage's ordered uniforms.
///
/// Layout must match `gpu::uniforms::pack_std140`: a leading
/// `vec4 _resolution` followed by every non-texture uniform in order.
pub(crate) fn stage_uniform_block(uniforms: &Uniforms) -> String {
    let mut block =
        String::from("layout(std140, set = 0, binding = 0) uniform StageParams {\n    vec4 _resolution;\n");
    for (name, value) in uniforms.iter() {
        let ty = match value {
            UniformValue::Float(_) => "float",
            UniformValue::Vec2(_) => "vec2",
            UniformValue::Vec3(_) => "vec3",
            UniformValue::Texture(_) => continue,
        };
        let _ = writeln!(block, "    {ty} {name};");
    }
    block.push_str("} params;\n");
    block
}

/// Program prologue: interface, uniform block, sampler and one sampling
/// helper `sample_<name>` per texture, bound at set 1 from binding 1 on.
fn header(block: &str, textures: &[&str]) -> String {
    let mut source = String::from(
        "#version 450\n\
         layout(location = 0) in vec2 v_uv;\n\
         layout(location = 0) out vec4 outColor;\n\n",
    );
    source.push_str(block);
    source.push_str("\nlayout(set = 1, binding = 0) uniform sampler fx_sampler;\n");
    for (index, name) in textures.iter().enumerate() {
        let _ = write!(
            source,
            "layout(set = 1, binding = {binding}) uniform texture2D {name};\n\
             vec4 sample_{name}(vec2 uv) {{\n    return textureLod(sampler2D({name}, fx_sampler), uv, 0.0);\n}}\n",
            binding = index + 1,
        );
    }
    source.push('\n');
    source
}

/// Full fragment program for a single-pass effect. Bloom runs as several
/// passes and is generated by the `bloom_*` functions instead.
pub(crate) fn effect_fragment(kind: EffectKind, uniforms: &Uniforms) -> Option<String> {
    let body = match kind {
        EffectKind::DotScreen => DOT_SCREEN,
        EffectKind::Glitch => GLITCH,
        EffectKind::RgbShift => RGB_SHIFT,
        EffectKind::Tint => TINT,
        EffectKind::NormalDisplacement => NORMAL_DISPLACEMENT,
        EffectKind::WaveDisplacement => WAVE_DISPLACEMENT,
        EffectKind::ColorCorrection => COLOR_CORRECTION,
        EffectKind::AntialiasFallback => FXAA,
        EffectKind::Bloom => return None,
    };
    let mut textures = vec![INPUT_TEXTURE];
    textures.extend(texture_uniforms(uniforms));
    Some(header(&stage_uniform_block(uniforms), &textures) + body)
}

pub(crate) fn bloom_high_pass(uniforms: &Uniforms) -> String {
    header(&stage_uniform_block(uniforms), &[INPUT_TEXTURE]) + BLOOM_HIGH_PASS
}

/// Separable Gaussian blur with the kernel radius baked in. The pass block
/// carries the output resolution and the blur direction.
pub(crate) fn bloom_blur(uniforms: &Uniforms, kernel_radius: u32) -> String {
    let mut source = header(&stage_uniform_block(uniforms), &[INPUT_TEXTURE]);
    let _ = writeln!(source, "const int KERNEL_RADIUS = {};", kernel_radius.max(1));
    source + BLOOM_BLUR
}

pub(crate) const BLOOM_MIP_TEXTURES: [&str; 5] = ["blur0", "blur1", "blur2", "blur3", "blur4"];

pub(crate) fn bloom_composite(uniforms: &Uniforms, factors: &[f32; 5]) -> String {
    let mut source = header(&stage_uniform_block(uniforms), &BLOOM_MIP_TEXTURES);
    let _ = writeln!(
        source,
        "const float BLOOM_FACTORS[5] = float[5]({:?}, {:?}, {:?}, {:?}, {:?});",
        factors[0], factors[1], factors[2], factors[3], factors[4]
    );
    source + BLOOM_COMPOSITE
}

pub(crate) fn bloom_add(uniforms: &Uniforms) -> String {
    header(&stage_uniform_block(uniforms), &[INPUT_TEXTURE, "tBloom"]) + BLOOM_ADD
}

/// Copies the final buffer onto the surface.
pub(crate) fn blit_fragment() -> String {
    header(&stage_uniform_block(&Uniforms::new()), &[INPUT_TEXTURE]) + BLIT
}

pub(crate) fn scene_fragment(max_spheres: usize) -> String {
    let mut source = String::from(
        "#version 450\n\
         layout(location = 0) in vec2 v_uv;\n\
         layout(location = 0) out vec4 outColor;\n\n",
    );
    let _ = writeln!(source, "const int MAX_SPHERES = {max_spheres};");
    source.push_str(SCENE);
    source
}

const DOT_SCREEN: &str = r"void main() {
    vec4 color = sample_tDiffuse(v_uv);
    vec2 tex = v_uv * params.tSize - params.center;
    float s = sin(params.angle);
    float c = cos(params.angle);
    vec2 point = vec2(c * tex.x - s * tex.y, s * tex.x + c * tex.y) * params.scale;
    float pattern = sin(point.x) * sin(point.y) * 4.0;
    float average = (color.r + color.g + color.b) / 3.0;
    outColor = vec4(vec3(average * 10.0 - 5.0 + pattern), color.a);
}
";

const RGB_SHIFT: &str = r"void main() {
    vec2 offset = params.amount * vec2(cos(params.angle), sin(params.angle));
    vec4 cr = sample_tDiffuse(v_uv + offset);
    vec4 cga = sample_tDiffuse(v_uv);
    vec4 cb = sample_tDiffuse(v_uv - offset);
    outColor = vec4(cr.r, cga.g, cb.b, cga.a);
}
";

const GLITCH: &str = r"float glitchHash(vec2 co) {
    return fract(sin(dot(co, vec2(12.9898, 78.233))) * 43758.5453);
}

void main() {
    vec2 p = v_uv;
    if (params.byp > 0.5) {
        outColor = sample_tDiffuse(p);
        return;
    }
    float xs = floor(gl_FragCoord.x / 0.5);
    float ys = floor(gl_FragCoord.y / 0.5);
    vec2 dispUv = p * params.seed * params.seed;
    vec2 normal = vec2(glitchHash(dispUv), glitchHash(dispUv + vec2(17.0, 31.0)));

    if (p.y < params.distortion_x + params.col_s && p.y > params.distortion_x - params.col_s * params.seed) {
        if (params.seed_x > 0.0) {
            p.y = 1.0 - (p.y + params.distortion_y);
        } else {
            p.y = params.distortion_y;
        }
    }
    if (p.x < params.distortion_y + params.col_s && p.x > params.distortion_y - params.col_s * params.seed) {
        if (params.seed_y > 0.0) {
            p.x = params.distortion_x;
        } else {
            p.x = 1.0 - (p.x + params.distortion_x);
        }
    }
    p.x += normal.x * params.seed_x * (params.seed / 5.0);
    p.y += normal.y * params.seed_y * (params.seed / 5.0);

    vec2 offset = params.amount * vec2(cos(params.angle), sin(params.angle));
    vec4 cr = sample_tDiffuse(p + offset);
    vec4 cga = sample_tDiffuse(p);
    vec4 cb = sample_tDiffuse(p - offset);
    float snow = 200.0 * params.amount * glitchHash(vec2(xs * params.seed, ys * params.seed * 50.0)) * 0.2;
    outColor = vec4(cr.r, cga.g, cb.b, cga.a) + vec4(snow);
}
";

const TINT: &str = r"void main() {
    vec4 color = sample_tDiffuse(v_uv);
    outColor = vec4(color.rgb + params.uTint, color.a);
}
";

const NORMAL_DISPLACEMENT: &str = r"void main() {
    vec3 normal = sample_uNormalMap(v_uv).rgb * 2.0 - vec3(1.0);
    vec4 color = sample_tDiffuse(v_uv + normal.xy * params.uStrength);
    float lightness = clamp(dot(normal, normalize(vec3(-1.0, 1.0, 0.0))), 0.0, 1.0) * 2.0;
    outColor = vec4(color.rgb + vec3(lightness), color.a);
}
";

const WAVE_DISPLACEMENT: &str = r"void main() {
    float shifted = v_uv.y + sin(v_uv.x * params.uFrequency + params.uTime) * params.uAmplitude;
    outColor = sample_tDiffuse(vec2(v_uv.x, shifted));
}
";

const COLOR_CORRECTION: &str = r"float linearToSrgb(float value) {
    if (value <= 0.0031308) {
        return value * 12.92;
    }
    return pow(value, 0.41666) * 1.055 - 0.055;
}

void main() {
    vec4 color = sample_tDiffuse(v_uv);
    outColor = vec4(linearToSrgb(color.r), linearToSrgb(color.g), linearToSrgb(color.b), color.a);
}
";

const FXAA: &str = r"const vec3 LUMA = vec3(0.299, 0.587, 0.114);
const float FXAA_REDUCE_MIN = 1.0 / 128.0;
const float FXAA_REDUCE_MUL = 1.0 / 8.0;
const float FXAA_SPAN_MAX = 8.0;

void main() {
    vec2 texel = params._resolution.zw;
    vec4 rgbaM = sample_tDiffuse(v_uv);
    vec3 rgbNW = sample_tDiffuse(v_uv + vec2(-1.0, -1.0) * texel).rgb;
    vec3 rgbNE = sample_tDiffuse(v_uv + vec2(1.0, -1.0) * texel).rgb;
    vec3 rgbSW = sample_tDiffuse(v_uv + vec2(-1.0, 1.0) * texel).rgb;
    vec3 rgbSE = sample_tDiffuse(v_uv + vec2(1.0, 1.0) * texel).rgb;

    float lumaNW = dot(rgbNW, LUMA);
    float lumaNE = dot(rgbNE, LUMA);
    float lumaSW = dot(rgbSW, LUMA);
    float lumaSE = dot(rgbSE, LUMA);
    float lumaM = dot(rgbaM.rgb, LUMA);
    float lumaMin = min(lumaM, min(min(lumaNW, lumaNE), min(lumaSW, lumaSE)));
    float lumaMax = max(lumaM, max(max(lumaNW, lumaNE), max(lumaSW, lumaSE)));

    vec2 dir = vec2(-((lumaNW + lumaNE) - (lumaSW + lumaSE)), (lumaNW + lumaSW) - (lumaNE + lumaSE));
    float reduce = max((lumaNW + lumaNE + lumaSW + lumaSE) * (0.25 * FXAA_REDUCE_MUL), FXAA_REDUCE_MIN);
    float rcpMin = 1.0 / (min(abs(dir.x), abs(dir.y)) + reduce);
    dir = clamp(dir * rcpMin, vec2(-FXAA_SPAN_MAX), vec2(FXAA_SPAN_MAX)) * texel;

    vec3 rgbA = 0.5 * (
        sample_tDiffuse(v_uv + dir * (1.0 / 3.0 - 0.5)).rgb +
        sample_tDiffuse(v_uv + dir * (2.0 / 3.0 - 0.5)).rgb);
    vec3 rgbB = rgbA * 0.5 + 0.25 * (
        sample_tDiffuse(v_uv + dir * -0.5).rgb +
        sample_tDiffuse(v_uv + dir * 0.5).rgb);
    float lumaB = dot(rgbB, LUMA);
    if (lumaB < lumaMin || lumaB > lumaMax) {
        outColor = vec4(rgbA, rgbaM.a);
    } else {
        outColor = vec4(rgbB, rgbaM.a);
    }
}
";

const BLOOM_HIGH_PASS: &str = r"const vec3 LUMA = vec3(0.299, 0.587, 0.114);

void main() {
    vec4 texel = sample_tDiffuse(v_uv);
    float alpha = smoothstep(params.threshold, params.threshold + params.smoothWidth, dot(texel.rgb, LUMA));
    outColor = texel * alpha;
}
";

const BLOOM_BLUR: &str = r"float gaussianPdf(float x, float sigma) {
    return 0.39894 * exp(-0.5 * x * x / (sigma * sigma)) / sigma;
}

void main() {
    vec2 invSize = params._resolution.zw;
    float sigma = float(KERNEL_RADIUS);
    float weightSum = gaussianPdf(0.0, sigma);
    vec3 sum = sample_tDiffuse(v_uv).rgb * weightSum;
    for (int i = 1; i < KERNEL_RADIUS; i++) {
        float x = float(i);
        float w = gaussianPdf(x, sigma);
        vec2 offset = params.direction * invSize * x;
        sum += (sample_tDiffuse(v_uv + offset).rgb + sample_tDiffuse(v_uv - offset).rgb) * w;
        weightSum += 2.0 * w;
    }
    outColor = vec4(sum / weightSum, 1.0);
}
";

const BLOOM_COMPOSITE: &str = r"float lerpBloomFactor(float factor) {
    float mirrorFactor = 1.2 - factor;
    return mix(factor, mirrorFactor, params.radius);
}

void main() {
    outColor = params.strength * (
        lerpBloomFactor(BLOOM_FACTORS[0]) * sample_blur0(v_uv) +
        lerpBloomFactor(BLOOM_FACTORS[1]) * sample_blur1(v_uv) +
        lerpBloomFactor(BLOOM_FACTORS[2]) * sample_blur2(v_uv) +
        lerpBloomFactor(BLOOM_FACTORS[3]) * sample_blur3(v_uv) +
        lerpBloomFactor(BLOOM_FACTORS[4]) * sample_blur4(v_uv));
}
";

const BLOOM_ADD: &str = r"void main() {
    vec4 base = sample_tDiffuse(v_uv);
    vec4 glow = sample_tBloom(v_uv);
    outColor = vec4(base.rgb + glow.rgb, base.a);
}
";

const BLIT: &str = r"void main() {
    outColor = sample_tDiffuse(v_uv);
}
";

/// Ray-cast spheres, directional light, equirect environment, tone mapping.
/// The block layout must match `gpu::scene::SceneUniforms`.
const SCENE: &str = r"const float PI = 3.141592653589793;

layout(std140, set = 0, binding = 0) uniform SceneParams {
    mat4 inverseViewProjection;
    vec4 cameraPosition;
    vec4 lightDirection;
    vec4 lightRadiance;
    vec4 clearColor;
    vec4 environment;
    vec4 counts;
    vec4 sphereCenterRadius[MAX_SPHERES];
    vec4 sphereColorRoughness[MAX_SPHERES];
    vec4 sphereMetalness[MAX_SPHERES];
} params;

layout(set = 1, binding = 0) uniform sampler env_sampler;
layout(set = 1, binding = 1) uniform texture2D environmentMap;

const mat3 ACES_INPUT = mat3(
    vec3(0.59719, 0.07600, 0.02840),
    vec3(0.35458, 0.90834, 0.13383),
    vec3(0.04823, 0.01566, 0.83777));
const mat3 ACES_OUTPUT = mat3(
    vec3(1.60475, -0.10208, -0.00327),
    vec3(-0.53108, 1.10813, -0.07276),
    vec3(-0.07367, -0.00605, 1.07602));

vec3 rrtAndOdtFit(vec3 v) {
    vec3 a = v * (v + 0.0245786) - 0.000090537;
    vec3 b = v * (0.983729 * v + 0.4329510) + 0.238081;
    return a / b;
}

vec3 acesFilmic(vec3 color, float exposure) {
    color = ACES_INPUT * (color * exposure / 0.6);
    color = ACES_OUTPUT * rrtAndOdtFit(color);
    return clamp(color, vec3(0.0), vec3(1.0));
}

vec2 equirectUv(vec3 dir) {
    float u = atan(dir.z, dir.x) / (2.0 * PI) + 0.5;
    float v = 0.5 - asin(clamp(dir.y, -1.0, 1.0)) / PI;
    return vec2(u, v);
}

vec3 environmentColor(vec3 dir) {
    if (params.environment.x < 0.5) {
        return vec3(0.0);
    }
    return textureLod(sampler2D(environmentMap, env_sampler), equirectUv(dir), 0.0).rgb;
}

float intersectSphere(vec3 origin, vec3 dir, vec4 sphere) {
    vec3 oc = origin - sphere.xyz;
    float b = dot(oc, dir);
    float c = dot(oc, oc) - sphere.w * sphere.w;
    float discriminant = b * b - c;
    if (discriminant < 0.0) {
        return -1.0;
    }
    float root = sqrt(discriminant);
    float nearHit = -b - root;
    if (nearHit > 0.0001) {
        return nearHit;
    }
    float farHit = -b + root;
    if (farHit > 0.0001) {
        return farHit;
    }
    return -1.0;
}

vec3 shade(vec3 dir, vec3 hitPoint, int index) {
    vec4 centerRadius = params.sphereCenterRadius[index];
    vec4 colorRoughness = params.sphereColorRoughness[index];
    float metalness = params.sphereMetalness[index].x;
    float roughness = colorRoughness.w;

    vec3 normal = normalize(hitPoint - centerRadius.xyz);
    vec3 view = -dir;
    vec3 diffuse = colorRoughness.rgb * (1.0 - metalness);
    vec3 f0 = mix(vec3(0.04), colorRoughness.rgb, metalness);

    vec3 lightDir = params.lightDirection.xyz;
    float nDotL = max(dot(normal, lightDir), 0.0);
    vec3 halfDir = normalize(lightDir + view);
    float shininess = max(2.0 / pow(max(roughness, 0.05), 4.0) - 2.0, 1.0);
    vec3 specular = f0 * pow(max(dot(normal, halfDir), 0.0), shininess) * ((shininess + 2.0) / (8.0 * PI));
    vec3 direct = (diffuse / PI + specular) * params.lightRadiance.rgb * nDotL;

    float nDotV = clamp(dot(normal, view), 0.0, 1.0);
    vec3 fresnel = f0 + (vec3(1.0) - f0) * pow(1.0 - nDotV, 5.0);
    vec3 reflected = reflect(dir, normal);
    vec3 ambient = diffuse * environmentColor(normal)
        + fresnel * environmentColor(reflected) * (1.0 - roughness);
    return direct + ambient * params.environment.y;
}

void main() {
    vec2 ndc = vec2(v_uv.x * 2.0 - 1.0, 1.0 - v_uv.y * 2.0);
    vec4 farPoint = params.inverseViewProjection * vec4(ndc, 1.0, 1.0);
    vec3 origin = params.cameraPosition.xyz;
    vec3 dir = normalize(farPoint.xyz / farPoint.w - origin);

    int sphereCount = int(params.counts.x);
    int hit = -1;
    float closest = 0.0;
    for (int i = 0; i < MAX_SPHERES; i++) {
        if (i >= sphereCount) {
            break;
        }
        float t = intersectSphere(origin, dir, params.sphereCenterRadius[i]);
        if (t > 0.0 && (hit < 0 || t < closest)) {
            closest = t;
            hit = i;
        }
    }

    vec3 color = params.clearColor.rgb;
    if (hit >= 0) {
        color = shade(dir, origin + dir * closest, hit);
    } else if (params.environment.x > 0.5) {
        color = environmentColor(dir);
    }
    if (params.environment.w > 0.5) {
        color = acesFilmic(color, params.environment.z);
    }
    outColor = vec4(color, 1.0);
}
";

/// Full-screen triangle; `v_uv` has its origin at the top-left corner.
const VERTEX_SHADER_GLSL: &str = r"#version 450
layout(location = 0) out vec2 v_uv;

const vec2 positions[3] = vec2[3](
    vec2(-1.0, -3.0),
    vec2(3.0, 1.0),
    vec2(-1.0, 1.0)
);

void main() {
    uint vertex_index = uint(gl_VertexIndex);
    vec2 pos = positions[vertex_index];
    v_uv = vec2(pos.x * 0.5 + 0.5, 0.5 - pos.y * 0.5);
    gl_Position = vec4(pos, 0.0, 1.0);
}
";

#[cfg(test)]
mod tests {
    use super::*;
    use composer::{Stage, MAX_SPHERES};
    use wgpu::naga;

    fn validate(source: &str, stage: naga::ShaderStage) {
        let module = naga::front::glsl::Frontend::default()
            .parse(&naga::front::glsl::Options::from(stage), source)
            .unwrap_or_else(|err| panic!("parse failed: {err:?}\n{source}"));
        naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        )
        .validate(&module)
        .unwrap_or_else(|err| panic!("validation failed: {err:?}\n{source}"));
    }

    #[test]
    fn block_skips_textures_and_keeps_order() {
        let stage = Stage::normal_displacement(None);
        let block = stage_uniform_block(stage.uniforms());
        assert!(block.contains("vec4 _resolution;\n    float uStrength;"));
        assert!(!block.contains("uNormalMap"));
        assert_eq!(texture_uniforms(stage.uniforms()), ["uNormalMap"]);
    }

    #[test]
    fn every_single_pass_effect_compiles() {
        for kind in EffectKind::ALL {
            let stage = Stage::effect(kind);
            match effect_fragment(kind, stage.uniforms()) {
                Some(source) => validate(&source, naga::ShaderStage::Fragment),
                None => assert_eq!(kind, EffectKind::Bloom),
            }
        }
    }

    #[test]
    fn bloom_passes_compile() {
        let stage = Stage::bloom();
        validate(&bloom_high_pass(stage.uniforms()), naga::ShaderStage::Fragment);
        let pass = Uniforms::new().with("direction", UniformValue::Vec2([1.0, 0.0]));
        validate(&bloom_blur(&pass, 11), naga::ShaderStage::Fragment);
        validate(
            &bloom_composite(stage.uniforms(), &[1.0, 0.8, 0.6, 0.4, 0.2]),
            naga::ShaderStage::Fragment,
        );
        validate(&bloom_add(stage.uniforms()), naga::ShaderStage::Fragment);
    }

    #[test]
    fn scene_blit_and_vertex_compile() {
        validate(&scene_fragment(MAX_SPHERES), naga::ShaderStage::Fragment);
        validate(&blit_fragment(), naga::ShaderStage::Fragment);
        validate(VERTEX_SHADER_GLSL, naga::ShaderStage::Vertex);
    }
}
