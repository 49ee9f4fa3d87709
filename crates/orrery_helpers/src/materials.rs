//! Procedural material descriptors
//!
//! A material is plain data: base parameters for the renderer's built-in
//! shading model, an ordered set of uniforms and a list of shader chunk
//! replacements. Animated materials are thin proxies exposing their uniforms
//! by name, plus a frame callback that advances `time`.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;
use orrery_core::Scope;
use orrery_fiber::use_frame;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Animated materials advance their clock ahead of the render pass
pub const MATERIAL_PRIORITY: i32 = -1;

/// Built-in shading model a descriptor extends
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadingModel {
    #[default]
    Standard,
    Physical,
    Points,
}

/// Parameters handed to the built-in shading model
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseParams {
    pub model: ShadingModel,
    /// Linear RGB
    pub color: [f32; 3],
    pub roughness: f32,
    pub metalness: f32,
    pub opacity: f32,
    pub transparent: bool,
    /// Point size, for [`ShadingModel::Points`]
    pub size: f32,
    pub size_attenuation: bool,
    pub vertex_colors: bool,
}

impl Default for BaseParams {
    fn default() -> Self {
        Self {
            model: ShadingModel::Standard,
            color: [1.0, 1.0, 1.0],
            roughness: 1.0,
            metalness: 0.0,
            opacity: 1.0,
            transparent: false,
            size: 1.0,
            size_attenuation: true,
            vertex_colors: false,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum UniformValue {
    Float(f32),
    Vec2([f32; 2]),
    Vec3([f32; 3]),
    Bool(bool),
}

impl UniformValue {
    pub fn as_float(&self) -> Option<f32> {
        match self {
            UniformValue::Float(value) => Some(*value),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

/// Replace one `#include <chunk>` of the built-in shader
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShaderPatch {
    pub stage: ShaderStage,
    pub chunk: String,
    pub replacement: String,
}

/// Data describing a procedural material
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MaterialDescriptor {
    pub name: String,
    pub base: BaseParams,
    #[serde(default)]
    pub uniforms: IndexMap<String, UniformValue>,
    #[serde(default)]
    pub patches: Vec<ShaderPatch>,
}

/// Shared handle to a descriptor
pub type MaterialHandle = Rc<RefCell<MaterialDescriptor>>;

impl MaterialDescriptor {
    pub fn new(name: impl Into<String>, base: BaseParams) -> Self {
        Self {
            name: name.into(),
            base,
            uniforms: IndexMap::new(),
            patches: Vec::new(),
        }
    }

    pub fn with_uniform(mut self, name: impl Into<String>, value: UniformValue) -> Self {
        self.uniforms.insert(name.into(), value);
        self
    }

    pub fn with_patch(
        mut self,
        stage: ShaderStage,
        chunk: impl Into<String>,
        replacement: impl Into<String>,
    ) -> Self {
        self.patches.push(ShaderPatch {
            stage,
            chunk: chunk.into(),
            replacement: replacement.into(),
        });
        self
    }

    pub fn into_handle(self) -> MaterialHandle {
        Rc::new(RefCell::new(self))
    }

    pub fn uniform(&self, name: &str) -> Option<&UniformValue> {
        self.uniforms.get(name)
    }

    pub fn float(&self, name: &str) -> Option<f32> {
        self.uniform(name).and_then(UniformValue::as_float)
    }

    /// Overwrite a float uniform; returns `false` when there is no float
    /// uniform called `name`
    pub fn set_float(&mut self, name: &str, value: f32) -> bool {
        match self.uniforms.get_mut(name) {
            Some(UniformValue::Float(current)) => {
                *current = value;
                true
            }
            _ => false,
        }
    }

    /// Apply this descriptor's patches for `stage` to shader `source`
    ///
    /// Uniform declarations are prepended so patched chunks can use them.
    pub fn patch_source(&self, stage: ShaderStage, source: &str) -> String {
        let mut out = String::with_capacity(source.len());
        for (name, value) in &self.uniforms {
            let ty = match value {
                UniformValue::Float(_) => "float",
                UniformValue::Vec2(_) => "vec2",
                UniformValue::Vec3(_) => "vec3",
                UniformValue::Bool(_) => "bool",
            };
            out.push_str(&format!("uniform {ty} {name};\n"));
        }
        let mut body = source.to_owned();
        for patch in self.patches.iter().filter(|p| p.stage == stage) {
            let include = format!("#include <{}>", patch.chunk);
            if !body.contains(&include) {
                tracing::warn!(
                    material = %self.name,
                    chunk = %patch.chunk,
                    "shader chunk not found"
                );
            }
            body = body.replace(&include, &patch.replacement);
        }
        out.push_str(&body);
        out
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(source: &str) -> Result<Self> {
        Ok(serde_json::from_str(source)?)
    }
}

fn read(material: &MaterialHandle, name: &str) -> f32 {
    material.borrow().float(name).unwrap_or_default()
}

fn write(material: &MaterialHandle, name: &str, value: f32) {
    if !material.borrow_mut().set_float(name, value) {
        tracing::warn!(uniform = name, "material has no such float uniform");
    }
}

// ============================================================================
// Wobble
// ============================================================================

const WOBBLE_VERTEX: &str = "float theta = sin(time + position.y) / 2.0 * factor;
float c = cos(theta);
float s = sin(theta);
mat3 m = mat3(c, 0, s, 0, 1, 0, -s, 0, c);
vec3 transformed = vec3(position) * m;
vNormal = vNormal * m;";

#[derive(Clone, Debug)]
pub struct WobbleOptions {
    pub base: BaseParams,
    /// Wobble strength
    pub factor: f32,
    /// Time multiplier
    pub speed: f32,
}

impl Default for WobbleOptions {
    fn default() -> Self {
        Self {
            base: BaseParams::default(),
            factor: 1.0,
            speed: 1.0,
        }
    }
}

/// Standard material whose vertices sway around the Y axis over time
#[derive(Clone, Debug)]
pub struct WobbleMaterial {
    material: MaterialHandle,
}

impl WobbleMaterial {
    pub fn new(options: &WobbleOptions) -> Self {
        let descriptor = MaterialDescriptor::new("wobble", options.base.clone())
            .with_uniform("time", UniformValue::Float(0.0))
            .with_uniform("factor", UniformValue::Float(options.factor))
            .with_patch(ShaderStage::Vertex, "begin_vertex", WOBBLE_VERTEX);
        Self {
            material: descriptor.into_handle(),
        }
    }

    pub fn material(&self) -> MaterialHandle {
        Rc::clone(&self.material)
    }

    pub fn time(&self) -> f32 {
        read(&self.material, "time")
    }

    pub fn set_time(&self, time: f32) {
        write(&self.material, "time", time);
    }

    pub fn factor(&self) -> f32 {
        read(&self.material, "factor")
    }

    pub fn set_factor(&self, factor: f32) {
        write(&self.material, "factor", factor);
    }
}

/// Mount a wobble material; `time` follows the root clock scaled by `speed`
pub fn wobble_material(scope: &Scope, options: WobbleOptions) -> Result<WobbleMaterial> {
    let wobble = WobbleMaterial::new(&options);
    let proxy = wobble.clone();
    let speed = options.speed;
    use_frame(scope, MATERIAL_PRIORITY, move |state| {
        proxy.set_time(state.elapsed * speed);
    })?;
    Ok(wobble)
}

// ============================================================================
// Distort
// ============================================================================

const DISTORT_VERTEX: &str = "float updateTime = time / 50.0;
float noise = snoise(vec3(position / 2.0 + updateTime * 5.0));
vec3 transformed = vec3(position * (noise * pow(distort, 2.0) + radius));";

#[derive(Clone, Debug)]
pub struct DistortOptions {
    pub base: BaseParams,
    /// Noise amplitude
    pub distort: f32,
    pub radius: f32,
    /// Time multiplier
    pub speed: f32,
}

impl Default for DistortOptions {
    fn default() -> Self {
        Self {
            base: BaseParams::default(),
            distort: 0.4,
            radius: 1.0,
            speed: 1.0,
        }
    }
}

/// Physical material displaced by animated simplex noise
#[derive(Clone, Debug)]
pub struct DistortMaterial {
    material: MaterialHandle,
}

impl DistortMaterial {
    pub fn new(options: &DistortOptions) -> Self {
        let base = BaseParams {
            model: ShadingModel::Physical,
            ..options.base.clone()
        };
        let descriptor = MaterialDescriptor::new("distort", base)
            .with_uniform("time", UniformValue::Float(0.0))
            .with_uniform("distort", UniformValue::Float(options.distort))
            .with_uniform("radius", UniformValue::Float(options.radius))
            .with_patch(ShaderStage::Vertex, "begin_vertex", DISTORT_VERTEX);
        Self {
            material: descriptor.into_handle(),
        }
    }

    pub fn material(&self) -> MaterialHandle {
        Rc::clone(&self.material)
    }

    pub fn time(&self) -> f32 {
        read(&self.material, "time")
    }

    pub fn set_time(&self, time: f32) {
        write(&self.material, "time", time);
    }

    pub fn distort(&self) -> f32 {
        read(&self.material, "distort")
    }

    pub fn set_distort(&self, distort: f32) {
        write(&self.material, "distort", distort);
    }

    pub fn radius(&self) -> f32 {
        read(&self.material, "radius")
    }

    pub fn set_radius(&self, radius: f32) {
        write(&self.material, "radius", radius);
    }
}

/// Mount a distort material; `time` accumulates frame deltas scaled by `speed`
pub fn distort_material(scope: &Scope, options: DistortOptions) -> Result<DistortMaterial> {
    let distort = DistortMaterial::new(&options);
    let proxy = distort.clone();
    let speed = options.speed;
    use_frame(scope, MATERIAL_PRIORITY, move |state| {
        proxy.set_time(proxy.time() + state.delta * speed);
    })?;
    Ok(distort)
}

// ============================================================================
// Points
// ============================================================================

const POINT_FRAGMENT: &str = "vec2 cxy = 2.0 * gl_PointCoord - 1.0;
float r = dot(cxy, cxy);
float delta = fwidth(r);
float mask = 1.0 - smoothstep(1.0 - delta, 1.0 + delta, r);
gl_FragColor = vec4(gl_FragColor.rgb, mask * gl_FragColor.a);";

/// Points drawn as anti-aliased discs instead of squares
#[derive(Clone, Debug)]
pub struct PointMaterial {
    material: MaterialHandle,
}

impl PointMaterial {
    pub fn new(base: BaseParams) -> Self {
        let base = BaseParams {
            model: ShadingModel::Points,
            transparent: true,
            ..base
        };
        let descriptor = MaterialDescriptor::new("point", base).with_patch(
            ShaderStage::Fragment,
            "premultiplied_alpha_fragment",
            POINT_FRAGMENT,
        );
        Self {
            material: descriptor.into_handle(),
        }
    }

    pub fn material(&self) -> MaterialHandle {
        Rc::clone(&self.material)
    }

    pub fn size(&self) -> f32 {
        self.material.borrow().base.size
    }

    pub fn set_size(&self, size: f32) {
        self.material.borrow_mut().base.size = size;
    }
}

impl Default for PointMaterial {
    fn default() -> Self {
        Self::new(BaseParams::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orrery_core::{Element, ReactiveGraph};
    use orrery_fiber::{HeadlessRenderer, Root, RootDescriptor};

    #[test]
    fn test_uniform_proxies() {
        let wobble = WobbleMaterial::new(&WobbleOptions::default());
        assert_eq!(wobble.factor(), 1.0);
        wobble.set_factor(0.25);
        assert_eq!(wobble.material().borrow().float("factor"), Some(0.25));

        let mut descriptor = wobble.material().borrow().clone();
        assert!(!descriptor.set_float("missing", 1.0));
    }

    #[test]
    fn test_patch_source() {
        let wobble = WobbleMaterial::new(&WobbleOptions::default());
        let source = "void main() {\n#include <begin_vertex>\n}";
        let patched = wobble
            .material()
            .borrow()
            .patch_source(ShaderStage::Vertex, source);
        assert!(patched.starts_with("uniform float time;\nuniform float factor;\n"));
        assert!(patched.contains("vNormal = vNormal * m;"));
        assert!(!patched.contains("#include <begin_vertex>"));

        let fragment = wobble
            .material()
            .borrow()
            .patch_source(ShaderStage::Fragment, "#include <begin_vertex>");
        assert!(fragment.ends_with("#include <begin_vertex>"));
    }

    #[test]
    fn test_json_export() {
        let point = PointMaterial::default();
        point.set_size(4.0);
        let json = point.material().borrow().to_json().unwrap();
        let parsed = MaterialDescriptor::from_json(&json).unwrap();
        assert_eq!(parsed.base.model, ShadingModel::Points);
        assert_eq!(parsed.base.size, 4.0);
        assert!(MaterialDescriptor::from_json("{").is_err());
    }

    #[test]
    fn test_time_advances_with_frames() {
        let graph = ReactiveGraph::new();
        let (_, renderer) = HeadlessRenderer::shared(Element::new("canvas"));
        let root = Root::create(&graph, RootDescriptor::new(renderer)).unwrap();
        let scope = root.mount();

        let wobble = wobble_material(
            &scope,
            WobbleOptions {
                speed: 2.0,
                ..Default::default()
            },
        )
        .unwrap();
        let distort = distort_material(&scope, DistortOptions::default()).unwrap();

        root.force_frame(1.0);
        root.force_frame(1.5);
        assert!((wobble.time() - 1.0).abs() < 1e-6);
        assert!((distort.time() - 0.5).abs() < 1e-6);

        scope.dispose();
        root.force_frame(2.0);
        assert!((distort.time() - 0.5).abs() < 1e-6);
    }
}
