//! The scene-graph renderer.
//!
//! `Renderer::render(template, values)` mutates an owned drawable
//! [`Layer`]. The state machine has two paths:
//!
//! - **Rebuild** — triggered by a template identity-hash mismatch or a
//!   filter/fill change. The layer is wiped, sized to the canvas, given its
//!   optional fill rect and background-image node, and one drawable node is
//!   created per element, depth-first. Nodes are looked up by element id
//!   under their intended parent and attached if absent — value-only
//!   changes never destroy and recreate nodes.
//! - **Value injection** — always runs. The *existing* node tree is walked:
//!   text nodes get their value and auto-fit, groups recurse with the
//!   nested map, image-bearing nodes load output references or invoke
//!   their registered generator with the compiled options (output cached
//!   by options hash), falling back to the declared placeholder on
//!   failure.
//!
//! Redraw is batched: the pass tracks whether anything actually changed and
//! reports at most one redraw scope — the innermost affected group, or the
//! root layer.
//!
//! Every failure during a pass is recovered into a node readiness marker;
//! [`Renderer::wait_ready`] turns lingering `Loading`/`Failed` markers into
//! a bounded, reported error instead of an open-ended poll.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use image::RgbaImage;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use crate::content::ContentStore;
use crate::generator::GeneratorRegistry;
use crate::raster::{RasterError, Rasterizer, wrap_lines};
use crate::scene::{Layer, Node, NodeKind, Readiness, ensure_child};
use crate::template::{Color, Element, Template};
use crate::uri::{ResolveCtx, Resolver};
use crate::values::Value;

/// Synthetic node ids for the canvas fill and background image.
const FILL_NODE_ID: &str = "__canvas_fill";
const BACKGROUND_NODE_ID: &str = "__canvas_background";

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("assets not ready within {timeout:?}: {nodes:?}")]
    AssetsNotReady {
        nodes: Vec<String>,
        timeout: Duration,
    },
    #[error(transparent)]
    Raster(#[from] RasterError),
}

/// Which elements participate in a render pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LayerFilter {
    #[default]
    All,
    /// Skip anything lacking the editable flag, but keep groups to recurse
    /// into.
    DynamicOnly,
    /// Skip editable elements and their value injection entirely — used to
    /// render a background once and reuse it across records.
    StaticOnly,
}

/// What a render pass decided to redraw.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedrawScope {
    Root,
    Group(String),
}

/// Outcome of one render pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderReport {
    pub rebuilt: bool,
    /// `None` when nothing changed; otherwise the single batched redraw.
    pub redraw: Option<RedrawScope>,
}

/// Node-lifecycle counters, mostly useful to tests and diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub nodes_created: usize,
    pub nodes_destroyed: usize,
    pub rebuilds: usize,
}

/// Collaborators a render pass needs.
pub struct RenderEnv<'a> {
    pub store: &'a ContentStore,
    pub resolver: &'a Resolver,
    pub generators: &'a GeneratorRegistry,
}

/// Tracks changes during one pass and folds them into a single redraw
/// scope: the innermost group when all changes share one, else the root.
#[derive(Default)]
struct Changed {
    root: bool,
    groups: Vec<String>,
}

impl Changed {
    fn mark(&mut self, scope: Option<&str>) {
        match scope {
            None => self.root = true,
            Some(group) => {
                if !self.groups.iter().any(|g| g == group) {
                    self.groups.push(group.to_string());
                }
            }
        }
    }

    fn into_scope(self) -> Option<RedrawScope> {
        if self.root {
            return Some(RedrawScope::Root);
        }
        let mut groups = self.groups;
        match groups.len() {
            0 => None,
            1 => groups.pop().map(RedrawScope::Group),
            _ => Some(RedrawScope::Root),
        }
    }
}

type GeneratedCache = HashMap<(String, String), Arc<RgbaImage>>;

/// Incremental scene-graph renderer bound to one drawing backend.
pub struct Renderer<B: Rasterizer> {
    backend: B,
    layer: Layer,
    fill: Option<Color>,
    filter: LayerFilter,
    template_hash: Option<String>,
    needs_rebuild: bool,
    generated: GeneratedCache,
    stats: RenderStats,
}

impl<B: Rasterizer> Renderer<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            layer: Layer::new(),
            fill: None,
            filter: LayerFilter::All,
            template_hash: None,
            needs_rebuild: true,
            generated: GeneratedCache::new(),
            stats: RenderStats::default(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn layer(&self) -> &Layer {
        &self.layer
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    pub fn filter(&self) -> LayerFilter {
        self.filter
    }

    /// Change the layer filter. Forces the next render to rebuild.
    pub fn set_filter(&mut self, filter: LayerFilter) {
        if filter != self.filter {
            self.filter = filter;
            self.needs_rebuild = true;
        }
    }

    /// Opaque background color inserted beneath everything on rebuild.
    pub fn set_fill(&mut self, fill: Option<Color>) {
        if fill != self.fill {
            self.fill = fill;
            self.needs_rebuild = true;
        }
    }

    /// Build or update the scene for `(template, values)`.
    pub fn render(&mut self, template: &Template, values: &Value, env: &RenderEnv) -> RenderReport {
        let hash = template.identity_hash();
        let rebuild = self.needs_rebuild || self.template_hash.as_deref() != Some(hash.as_str());
        let mut changed = Changed::default();

        if rebuild {
            self.rebuild(template, env, &mut changed);
            self.template_hash = Some(hash);
            self.needs_rebuild = false;
            self.stats.rebuilds += 1;
        }

        if self.filter != LayerFilter::StaticOnly {
            self.inject(values, env, &mut changed);
        }

        RenderReport {
            rebuilt: rebuild,
            redraw: changed.into_scope(),
        }
    }

    /// Completion barrier: every node with a readiness marker must be
    /// loaded. Loads resolve synchronously here, so this inspects markers
    /// and reports stragglers instead of polling open-endedly.
    pub fn wait_ready(&self, timeout: Duration) -> Result<(), RenderError> {
        let nodes = self.layer.unready_nodes();
        if nodes.is_empty() {
            Ok(())
        } else {
            Err(RenderError::AssetsNotReady { nodes, timeout })
        }
    }

    /// Flatten the current scene through the backend.
    pub fn rasterize(&self) -> Result<RgbaImage, RenderError> {
        Ok(self.backend.render(&self.layer)?)
    }

    fn rebuild(&mut self, template: &Template, env: &RenderEnv, changed: &mut Changed) {
        debug!(template = %template.name, "rebuilding scene");
        self.stats.nodes_destroyed += self.layer.clear();
        self.layer.width = template.canvas.width;
        self.layer.height = template.canvas.height;

        let mut nodes = std::mem::take(&mut self.layer.nodes);

        if let Some(fill) = self.fill {
            let mut node = Node::new(FILL_NODE_ID, NodeKind::Rect { fill });
            node.width = template.canvas.width as f32;
            node.height = template.canvas.height as f32;
            nodes.push(node);
            self.stats.nodes_created += 1;
        }

        if let Some(background) = &template.canvas.background {
            let mut node = Node::new(
                BACKGROUND_NODE_ID,
                NodeKind::Image {
                    source: Some(background.clone()),
                    bitmap: None,
                    cover: false,
                    generator: None,
                    placeholder: None,
                },
            );
            node.width = template.canvas.width as f32;
            node.height = template.canvas.height as f32;
            node.readiness = Readiness::Loading;
            Self::load_reference(&self.backend, &mut node, background, env);
            nodes.push(node);
            self.stats.nodes_created += 1;
        }

        for element in &template.elements {
            Self::build_element(&self.backend, element, self.filter, &mut nodes, &mut self.stats, env);
        }

        self.layer.nodes = nodes;
        changed.mark(None);
    }

    /// Depth-first create/update of one drawable node per element. Nodes
    /// are found by id under the intended parent; absent nodes are created
    /// and attached.
    fn build_element(
        backend: &B,
        element: &Element,
        filter: LayerFilter,
        children: &mut Vec<Node>,
        stats: &mut RenderStats,
        env: &RenderEnv,
    ) {
        match element {
            Element::Text(e) => {
                if filter == LayerFilter::StaticOnly {
                    return;
                }
                let (node, created) = ensure_child(children, &e.id, || {
                    Node::new(
                        e.id.clone(),
                        NodeKind::Text {
                            text: e.value.clone(),
                            style: e.style.clone(),
                            base_y: e.frame.y,
                            base_height: e.frame.height,
                        },
                    )
                });
                if created {
                    stats.nodes_created += 1;
                }
                node.x = e.frame.x;
                node.y = e.frame.y;
                node.width = e.frame.width;
                node.height = e.frame.height;
                node.blend = e.blend;
                node.editable = true;
                if let NodeKind::Text { style, base_y, base_height, .. } = &mut node.kind {
                    *style = e.style.clone();
                    *base_y = e.frame.y;
                    *base_height = e.frame.height;
                }
                backend.ensure_font(&e.style, env.store);
            }
            Element::Image(e) => {
                if filter == LayerFilter::DynamicOnly {
                    return;
                }
                let (node, created) = ensure_child(children, &e.id, || {
                    Node::new(
                        e.id.clone(),
                        NodeKind::Image {
                            source: None,
                            bitmap: None,
                            cover: false,
                            generator: None,
                            placeholder: None,
                        },
                    )
                });
                if created {
                    stats.nodes_created += 1;
                }
                node.x = e.frame.x;
                node.y = e.frame.y;
                node.width = e.frame.width;
                node.height = e.frame.height;
                node.blend = e.blend;
                let needs_load = match &node.kind {
                    NodeKind::Image { source, bitmap, .. } => {
                        bitmap.is_none() || source.as_deref() != Some(e.src.as_str())
                    }
                    _ => true,
                };
                if needs_load {
                    node.readiness = Readiness::Loading;
                    if let NodeKind::Image { source, .. } = &mut node.kind {
                        *source = Some(e.src.clone());
                    }
                    Self::load_reference(backend, node, &e.src, env);
                }
            }
            Element::Generated(e) => {
                if filter == LayerFilter::StaticOnly {
                    return;
                }
                let (node, created) = ensure_child(children, &e.id, || {
                    Node::new(
                        e.id.clone(),
                        NodeKind::Image {
                            source: None,
                            bitmap: None,
                            cover: true,
                            generator: Some(e.generator.clone()),
                            placeholder: e.placeholder.clone(),
                        },
                    )
                });
                if created {
                    stats.nodes_created += 1;
                }
                node.x = e.frame.x;
                node.y = e.frame.y;
                node.width = e.frame.width;
                node.height = e.frame.height;
                node.blend = e.blend;
                node.editable = true;
            }
            Element::Group(e) => {
                let (node, created) =
                    ensure_child(children, &e.id, || Node::new(e.id.clone(), NodeKind::Group));
                if created {
                    stats.nodes_created += 1;
                }
                node.x = e.frame.x;
                node.y = e.frame.y;
                node.width = e.frame.width;
                node.height = e.frame.height;
                for child in &e.children {
                    Self::build_element(backend, child, filter, &mut node.children, stats, env);
                }
            }
        }
    }

    /// Value injection over the existing node tree.
    fn inject(&mut self, values: &Value, env: &RenderEnv, changed: &mut Changed) {
        let mut nodes = std::mem::take(&mut self.layer.nodes);
        let parent_height = self.layer.height as f32;
        Self::inject_nodes(
            &self.backend,
            &mut nodes,
            values,
            env,
            &mut self.generated,
            changed,
            None,
            parent_height,
        );
        self.layer.nodes = nodes;
    }

    #[allow(clippy::too_many_arguments)]
    fn inject_nodes(
        backend: &B,
        nodes: &mut [Node],
        values: &Value,
        env: &RenderEnv,
        cache: &mut GeneratedCache,
        changed: &mut Changed,
        scope: Option<&str>,
        parent_height: f32,
    ) {
        for node in nodes {
            match &node.kind {
                NodeKind::Group => {
                    if let Some(nested) = values.get(&node.id) {
                        let nested = nested.clone();
                        let group_id = node.id.clone();
                        let height = node.height;
                        Self::inject_nodes(
                            backend,
                            &mut node.children,
                            &nested,
                            env,
                            cache,
                            changed,
                            Some(&group_id),
                            height,
                        );
                    }
                }
                NodeKind::Text { .. } => {
                    if !node.editable {
                        continue;
                    }
                    let Some(Value::Text(value)) = values.get(&node.id) else {
                        continue;
                    };
                    let mut node_changed = false;
                    if let NodeKind::Text { text, .. } = &mut node.kind
                        && *text != *value
                    {
                        *text = value.clone();
                        node_changed = true;
                    }
                    if Self::autofit_text(backend, node, parent_height) {
                        node_changed = true;
                    }
                    if node_changed {
                        changed.mark(scope);
                    }
                }
                NodeKind::Image { .. } => {
                    if !node.editable {
                        continue;
                    }
                    let Some(value) = values.get(&node.id) else {
                        continue;
                    };
                    match value {
                        // A ready output reference: load and attach it,
                        // unless it is already the node's content.
                        Value::Text(reference) => {
                            let current = matches!(
                                &node.kind,
                                NodeKind::Image { source: Some(s), bitmap: Some(_), .. }
                                    if s == reference
                            );
                            if !current {
                                let reference = reference.clone();
                                if let NodeKind::Image { source, .. } = &mut node.kind {
                                    *source = Some(reference.clone());
                                }
                                node.readiness = Readiness::Loading;
                                if Self::load_reference(backend, node, &reference, env) {
                                    changed.mark(scope);
                                }
                            }
                        }
                        Value::Map(options) => {
                            let options = options.clone();
                            if Self::run_generator(backend, node, &options, env, cache) {
                                changed.mark(scope);
                            }
                        }
                    }
                }
                NodeKind::Rect { .. } => {}
            }
        }
    }

    /// Resolve and decode a reference into the node, falling back to the
    /// declared placeholder. Returns whether the node's content changed.
    fn load_reference(backend: &B, node: &mut Node, reference: &str, env: &RenderEnv) -> bool {
        let ctx = ResolveCtx { store: env.store };
        let loaded = env
            .resolver
            .resolve(reference, &ctx)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                backend
                    .decode(&bytes)
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            });
        match loaded {
            Ok(bitmap) => Self::attach_bitmap(node, bitmap),
            Err(message) => {
                warn!(node = %node.id, uri = reference, %message, "asset load failed");
                Self::fall_back_to_placeholder(backend, node, env)
            }
        }
    }

    /// Invoke the node's registered generator with compiled options,
    /// caching output by `(generator, options-hash)`.
    fn run_generator(
        backend: &B,
        node: &mut Node,
        options: &std::collections::BTreeMap<String, Value>,
        env: &RenderEnv,
        cache: &mut GeneratedCache,
    ) -> bool {
        let NodeKind::Image { generator: Some(generator_id), .. } = &node.kind else {
            return false;
        };
        let generator_id = generator_id.clone();
        let Some(generator) = env.generators.get(&generator_id) else {
            warn!(node = %node.id, generator = %generator_id, "unknown generator");
            return Self::fall_back_to_placeholder(backend, node, env);
        };

        let key = (generator_id.clone(), hash_options(options));
        if let Some(cached) = cache.get(&key) {
            let cached = cached.clone();
            return Self::attach_bitmap(node, cached);
        }

        node.readiness = Readiness::Loading;
        match generator.generate(options, node.width as u32, node.height as u32) {
            Ok(output) => {
                let bitmap = Arc::new(output);
                cache.insert(key, bitmap.clone());
                Self::attach_bitmap(node, bitmap)
            }
            Err(err) => {
                warn!(node = %node.id, generator = %generator_id, %err, "generator failed");
                Self::fall_back_to_placeholder(backend, node, env)
            }
        }
    }

    fn fall_back_to_placeholder(backend: &B, node: &mut Node, env: &RenderEnv) -> bool {
        let NodeKind::Image { placeholder: Some(placeholder), .. } = &node.kind else {
            node.readiness = Readiness::Failed;
            return false;
        };
        let placeholder = placeholder.clone();
        let ctx = ResolveCtx { store: env.store };
        let loaded = env
            .resolver
            .resolve(&placeholder, &ctx)
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                backend
                    .decode(&bytes)
                    .map(Arc::new)
                    .map_err(|e| e.to_string())
            });
        match loaded {
            Ok(bitmap) => Self::attach_bitmap(node, bitmap),
            Err(message) => {
                warn!(node = %node.id, uri = %placeholder, %message, "placeholder load failed");
                node.readiness = Readiness::Failed;
                false
            }
        }
    }

    /// Attach a bitmap if it differs from the current content. Always
    /// settles the readiness marker.
    fn attach_bitmap(node: &mut Node, bitmap: Arc<RgbaImage>) -> bool {
        node.readiness = Readiness::Loaded;
        let NodeKind::Image { bitmap: slot, .. } = &mut node.kind else {
            return false;
        };
        let same = slot.as_ref().is_some_and(|b| Arc::ptr_eq(b, &bitmap));
        if same {
            false
        } else {
            *slot = Some(bitmap);
            true
        }
    }

    /// Grow the text box height one unit at a time until the wrapped lines
    /// fit or the parent bound is reached, then shift the node up by the
    /// growth so the bottom anchor stays put. Returns whether geometry
    /// changed.
    fn autofit_text(backend: &B, node: &mut Node, parent_height: f32) -> bool {
        let NodeKind::Text { text, style, base_y, base_height } = &node.kind else {
            return false;
        };
        let (base_y, base_height) = (*base_y, *base_height);
        let Some(line_h) = backend.line_height(style) else {
            return false;
        };
        let lines = wrap_lines(text, node.width, |s| {
            backend.measure(s, style).unwrap_or(0.0)
        });
        let needed = (lines.len() as f32 * line_h).ceil();
        // Growth moves the top edge up; it stops where the top would
        // leave the parent.
        let max_height = (base_y + base_height).min(parent_height).max(base_height);

        let mut height = base_height;
        while height < needed && height + 1.0 <= max_height {
            height += 1.0;
        }

        let target_y = base_y - (height - base_height);
        let moved = (node.height - height).abs() > f32::EPSILON
            || (node.y - target_y).abs() > f32::EPSILON;
        node.height = height;
        node.y = target_y;
        moved
    }
}

fn hash_options(options: &std::collections::BTreeMap<String, Value>) -> String {
    let json = serde_json::to_string(options).unwrap_or_default();
    format!("{:x}", Sha256::digest(json.as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::{GeneratorError, ImageGenerator};
    use crate::raster::tests::MockRasterizer;
    use crate::template::{
        Align, Canvas, Frame, GeneratedElement, GroupElement, ImageElement, TextElement, TextStyle,
    };
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn frame(x: f32, y: f32, w: f32, h: f32) -> Frame {
        Frame { x, y, width: w, height: h }
    }

    fn text_element(id: &str, f: Frame, value: &str) -> Element {
        Element::Text(TextElement {
            id: id.to_string(),
            name: None,
            frame: f,
            value: value.to_string(),
            style: TextStyle { size: 10.0, align: Align::Left, ..TextStyle::default() },
            blend: Default::default(),
        })
    }

    fn test_template() -> Template {
        Template {
            name: "card".to_string(),
            version: 1,
            canvas: Canvas { width: 200, height: 100, background: None },
            variables: vec![],
            elements: vec![
                text_element("title", frame(10.0, 10.0, 100.0, 12.0), "hello"),
                Element::Image(ImageElement {
                    id: "logo".to_string(),
                    name: None,
                    frame: frame(10.0, 30.0, 40.0, 40.0),
                    src: "content://logo.png".to_string(),
                    blend: Default::default(),
                }),
                Element::Group(GroupElement {
                    id: "footer".to_string(),
                    name: None,
                    frame: frame(0.0, 60.0, 200.0, 40.0),
                    children: vec![text_element("sub", frame(5.0, 5.0, 80.0, 12.0), "sub")],
                }),
            ],
        }
    }

    fn env_with_logo<'a>(
        store: &'a mut ContentStore,
        resolver: &'a Resolver,
        generators: &'a GeneratorRegistry,
    ) -> RenderEnv<'a> {
        store.insert("logo.png", vec![1, 2, 3]);
        RenderEnv { store, resolver, generators }
    }

    fn simple_values(title: &str, sub: &str) -> Value {
        let mut footer = Value::map();
        footer.insert("sub", Value::text(sub));
        let mut values = Value::map();
        values.insert("title", Value::text(title));
        values.insert("footer", footer);
        values
    }

    #[test]
    fn first_render_rebuilds_second_injects_only() {
        let mut store = ContentStore::new();
        let resolver = Resolver::new();
        let generators = GeneratorRegistry::new();
        let env = env_with_logo(&mut store, &resolver, &generators);
        let template = test_template();
        let mut renderer = Renderer::new(MockRasterizer::new());

        let report = renderer.render(&template, &simple_values("a", "b"), &env);
        assert!(report.rebuilt);
        let created = renderer.stats().nodes_created;
        assert_eq!(created, 4); // title, logo, footer, sub

        // Same template, same values: zero creates, zero destroys.
        let report = renderer.render(&template, &simple_values("a", "b"), &env);
        assert!(!report.rebuilt);
        assert_eq!(report.redraw, None);
        assert_eq!(renderer.stats().nodes_created, created);
        assert_eq!(renderer.stats().nodes_destroyed, 0);
    }

    #[test]
    fn template_change_triggers_rebuild() {
        let mut store = ContentStore::new();
        let resolver = Resolver::new();
        let generators = GeneratorRegistry::new();
        let env = env_with_logo(&mut store, &resolver, &generators);
        let mut template = test_template();
        let mut renderer = Renderer::new(MockRasterizer::new());

        renderer.render(&template, &simple_values("a", "b"), &env);
        template.canvas.width = 201;
        let report = renderer.render(&template, &simple_values("a", "b"), &env);
        assert!(report.rebuilt);
        assert_eq!(renderer.stats().rebuilds, 2);
    }

    #[test]
    fn filter_change_forces_exactly_one_rebuild() {
        let mut store = ContentStore::new();
        let resolver = Resolver::new();
        let generators = GeneratorRegistry::new();
        let env = env_with_logo(&mut store, &resolver, &generators);
        let template = test_template();
        let mut renderer = Renderer::new(MockRasterizer::new());

        renderer.render(&template, &simple_values("a", "b"), &env);
        renderer.set_filter(LayerFilter::DynamicOnly);

        let report = renderer.render(&template, &simple_values("a", "b"), &env);
        assert!(report.rebuilt);
        let report = renderer.render(&template, &simple_values("a", "b"), &env);
        assert!(!report.rebuilt);
    }

    #[test]
    fn dynamic_only_skips_static_images_keeps_groups() {
        let mut store = ContentStore::new();
        let resolver = Resolver::new();
        let generators = GeneratorRegistry::new();
        let env = env_with_logo(&mut store, &resolver, &generators);
        let template = test_template();
        let mut renderer = Renderer::new(MockRasterizer::new());
        renderer.set_filter(LayerFilter::DynamicOnly);

        renderer.render(&template, &simple_values("a", "b"), &env);
        assert!(renderer.layer().child("title").is_some());
        assert!(renderer.layer().child("logo").is_none());
        let footer = renderer.layer().child("footer").unwrap();
        assert!(footer.child("sub").is_some());
    }

    #[test]
    fn static_only_skips_editables_and_injection() {
        let mut store = ContentStore::new();
        let resolver = Resolver::new();
        let generators = GeneratorRegistry::new();
        let env = env_with_logo(&mut store, &resolver, &generators);
        let template = test_template();
        let mut renderer = Renderer::new(MockRasterizer::new());
        renderer.set_filter(LayerFilter::StaticOnly);

        renderer.render(&template, &simple_values("a", "b"), &env);
        assert!(renderer.layer().child("title").is_none());
        assert!(renderer.layer().child("logo").is_some());
    }

    #[test]
    fn value_change_in_group_reports_group_scope() {
        let mut store = ContentStore::new();
        let resolver = Resolver::new();
        let generators = GeneratorRegistry::new();
        let env = env_with_logo(&mut store, &resolver, &generators);
        let template = test_template();
        let mut renderer = Renderer::new(MockRasterizer::new());

        renderer.render(&template, &simple_values("a", "b"), &env);
        let report = renderer.render(&template, &simple_values("a", "changed"), &env);
        assert!(!report.rebuilt);
        assert_eq!(report.redraw, Some(RedrawScope::Group("footer".to_string())));
    }

    #[test]
    fn value_changes_across_scopes_report_root() {
        let mut store = ContentStore::new();
        let resolver = Resolver::new();
        let generators = GeneratorRegistry::new();
        let env = env_with_logo(&mut store, &resolver, &generators);
        let template = test_template();
        let mut renderer = Renderer::new(MockRasterizer::new());

        renderer.render(&template, &simple_values("a", "b"), &env);
        let report = renderer.render(&template, &simple_values("x", "y"), &env);
        assert_eq!(report.redraw, Some(RedrawScope::Root));
    }

    #[test]
    fn autofit_grows_height_and_shifts_up() {
        let mut store = ContentStore::new();
        let resolver = Resolver::new();
        let generators = GeneratorRegistry::new();
        let env = env_with_logo(&mut store, &resolver, &generators);
        let template = test_template();
        let mut renderer = Renderer::new(MockRasterizer::new());

        // Mock metric: 5px per char at size 10; box width 100 → ~20 chars
        // per line. A long value wraps to several 12px lines while the
        // declared height is 12.
        let long = "alpha beta gamma delta epsilon zeta eta theta";
        renderer.render(&template, &simple_values(long, "b"), &env);

        let node = renderer.layer().child("title").unwrap();
        assert!(node.height > 12.0);
        // Bottom edge stays anchored: y + height == base_y + base_height
        assert!((node.y + node.height - (10.0 + 12.0)).abs() < 0.01);
        // Growth is bounded by the top of the layer
        assert!(node.y >= -0.01);
    }

    #[test]
    fn missing_asset_without_placeholder_reported_by_barrier() {
        let store = ContentStore::new();
        let resolver = Resolver::new();
        let generators = GeneratorRegistry::new();
        // No logo.png in the store: the image node load fails.
        let env = RenderEnv { store: &store, resolver: &resolver, generators: &generators };
        let template = test_template();
        let mut renderer = Renderer::new(MockRasterizer::new());

        renderer.render(&template, &simple_values("a", "b"), &env);
        let err = renderer.wait_ready(Duration::from_millis(100)).unwrap_err();
        match err {
            RenderError::AssetsNotReady { nodes, .. } => assert_eq!(nodes, vec!["logo"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn generator_placeholder_recovers_failed_load() {
        let mut store = ContentStore::new();
        store.insert("fallback.png", vec![9]);
        let resolver = Resolver::new();
        let generators = GeneratorRegistry::new(); // "checker" not registered
        let env = RenderEnv { store: &store, resolver: &resolver, generators: &generators };

        let template = Template {
            name: "gen".to_string(),
            version: 1,
            canvas: Canvas { width: 50, height: 50, background: None },
            variables: vec![],
            elements: vec![Element::Generated(GeneratedElement {
                id: "art".to_string(),
                name: None,
                frame: frame(0.0, 0.0, 50.0, 50.0),
                generator: "checker".to_string(),
                options: BTreeMap::new(),
                placeholder: Some("content://fallback.png".to_string()),
                blend: Default::default(),
            })],
        };
        let mut values = Value::map();
        values.insert("art", Value::Map(BTreeMap::new()));

        let mut renderer = Renderer::new(MockRasterizer::new());
        renderer.render(&template, &values, &env);
        // Placeholder stood in; the barrier is satisfied.
        renderer.wait_ready(Duration::from_millis(100)).unwrap();
    }

    /// Generator that counts invocations, to prove output caching.
    struct CountingGenerator {
        calls: AtomicUsize,
    }

    impl ImageGenerator for CountingGenerator {
        fn id(&self) -> &str {
            "counting"
        }
        fn generate(
            &self,
            _options: &BTreeMap<String, Value>,
            width: u32,
            height: u32,
        ) -> Result<RgbaImage, GeneratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RgbaImage::new(width.max(1), height.max(1)))
        }
    }

    #[test]
    fn generator_output_cached_by_options_hash() {
        let store = ContentStore::new();
        let resolver = Resolver::new();
        let mut generators = GeneratorRegistry::new();
        generators.register(Box::new(CountingGenerator { calls: AtomicUsize::new(0) }));
        let env = RenderEnv { store: &store, resolver: &resolver, generators: &generators };

        let template = Template {
            name: "gen".to_string(),
            version: 1,
            canvas: Canvas { width: 50, height: 50, background: None },
            variables: vec![],
            elements: vec![Element::Generated(GeneratedElement {
                id: "art".to_string(),
                name: None,
                frame: frame(0.0, 0.0, 50.0, 50.0),
                generator: "counting".to_string(),
                options: BTreeMap::new(),
                placeholder: None,
                blend: Default::default(),
            })],
        };
        let mut options = BTreeMap::new();
        options.insert("seed".to_string(), Value::text("x"));
        let mut values = Value::map();
        values.insert("art", Value::Map(options.clone()));

        let mut renderer = Renderer::new(MockRasterizer::new());
        let report = renderer.render(&template, &values, &env);
        assert_eq!(report.redraw, Some(RedrawScope::Root));
        let report = renderer.render(&template, &values, &env);
        // Cached output re-attached: nothing changed, no redraw.
        assert_eq!(report.redraw, None);

        // Different options regenerate.
        let mut other = BTreeMap::new();
        other.insert("seed".to_string(), Value::text("y"));
        let mut values2 = Value::map();
        values2.insert("art", Value::Map(other));
        let report = renderer.render(&template, &values2, &env);
        assert_eq!(report.redraw, Some(RedrawScope::Root));
    }

    #[test]
    fn ready_output_reference_attaches_image() {
        let mut store = ContentStore::new();
        store.insert("output.png", vec![4, 5, 6]);
        let resolver = Resolver::new();
        let generators = GeneratorRegistry::new();
        let env = RenderEnv { store: &store, resolver: &resolver, generators: &generators };

        let template = Template {
            name: "gen".to_string(),
            version: 1,
            canvas: Canvas { width: 50, height: 50, background: None },
            variables: vec![],
            elements: vec![Element::Generated(GeneratedElement {
                id: "art".to_string(),
                name: None,
                frame: frame(0.0, 0.0, 50.0, 50.0),
                generator: "whatever".to_string(),
                options: BTreeMap::new(),
                placeholder: None,
                blend: Default::default(),
            })],
        };
        let mut values = Value::map();
        values.insert("art", Value::text("content://output.png"));

        let mut renderer = Renderer::new(MockRasterizer::new());
        renderer.render(&template, &values, &env);
        renderer.wait_ready(Duration::from_millis(10)).unwrap();
        let node = renderer.layer().child("art").unwrap();
        assert!(matches!(
            &node.kind,
            NodeKind::Image { bitmap: Some(_), .. }
        ));
    }

    #[test]
    fn canvas_fill_and_background_nodes_inserted_first() {
        let mut store = ContentStore::new();
        store.insert("bg.png", vec![1]);
        let resolver = Resolver::new();
        let generators = GeneratorRegistry::new();
        let env = RenderEnv { store: &store, resolver: &resolver, generators: &generators };

        let mut template = test_template();
        template.canvas.background = Some("content://bg.png".to_string());
        // logo.png is missing, but we only look at fill/background here.
        let mut renderer = Renderer::new(MockRasterizer::new());
        renderer.set_fill(Some(Color::WHITE));
        renderer.render(&template, &simple_values("a", "b"), &env);

        let ids: Vec<&str> = renderer.layer().nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids[0], FILL_NODE_ID);
        assert_eq!(ids[1], BACKGROUND_NODE_ID);
    }
}
