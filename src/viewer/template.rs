//! Viewer DOM skeleton and typed region binding
//!
//! The skeleton is plain HTML. It is parsed with html5ever, flattened into
//! an owned element list, and each logical region is resolved through its
//! CSS selector. Every region is required: binding fails on the first one
//! that does not resolve.

use std::rc::Rc;

use html5ever::parse_document;
use html5ever::tendril::TendrilSink;
use markup5ever_rcdom::{Node, NodeData, RcDom};
use serde::{Deserialize, Serialize};

use super::error::ViewerError;
use super::surface::{
    CanvasState, Element, ElementInfo, IndicatorState, LayerState, ProgressState, Regions,
};

/// Skeleton used when the host does not supply a template
pub const DEFAULT_TEMPLATE: &str = r#"<div class="progress-bar"><div class="progress"></div></div>
<div class="loading">Loading&hellip;</div>
<canvas></canvas>
<div class="textLayer"></div>
<div class="annotationLayer"></div>
"#;

/// Default canvas size when the template does not set one (HTML defaults)
const DEFAULT_CANVAS_WIDTH: u32 = 300;
const DEFAULT_CANVAS_HEIGHT: u32 = 150;

/// CSS selectors for each logical region
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegionSelectors {
    pub canvas: String,
    pub text_layer: String,
    pub annotation_layer: String,
    pub progress: String,
    pub loading: String,
}

impl Default for RegionSelectors {
    fn default() -> Self {
        Self {
            canvas: "canvas".to_string(),
            text_layer: ".textLayer".to_string(),
            annotation_layer: ".annotationLayer".to_string(),
            progress: ".progress".to_string(),
            loading: ".loading".to_string(),
        }
    }
}

/// Parse `template` and bind every region named in `selectors`
pub fn bind_regions(template: &str, selectors: &RegionSelectors) -> Result<Regions, ViewerError> {
    let tree = ElementTree::parse(template)?;

    let canvas = tree.resolve("canvas", &selectors.canvas)?;
    let text_layer = tree.resolve("text_layer", &selectors.text_layer)?;
    let annotation_layer = tree.resolve("annotation_layer", &selectors.annotation_layer)?;
    let progress = tree.resolve("progress", &selectors.progress)?;
    let loading = tree.resolve("loading", &selectors.loading)?;

    let canvas_state = CanvasState::new(
        canvas.dimension("width").unwrap_or(DEFAULT_CANVAS_WIDTH),
        canvas.dimension("height").unwrap_or(DEFAULT_CANVAS_HEIGHT),
    );
    let loading_state = IndicatorState {
        visible: loading.attr("hidden").is_none(),
    };

    Ok(Regions {
        canvas: Element::new(canvas.info(&selectors.canvas), canvas_state),
        text_layer: Element::new(text_layer.info(&selectors.text_layer), LayerState::default()),
        annotation_layer: Element::new(
            annotation_layer.info(&selectors.annotation_layer),
            LayerState::default(),
        ),
        progress: Element::new(progress.info(&selectors.progress), ProgressState::default()),
        loading: Element::new(loading.info(&selectors.loading), loading_state),
    })
}

#[derive(Debug)]
struct ParsedElement {
    tag: String,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<(String, String)>,
    /// Indices of enclosing elements, nearest first
    ancestors: Vec<usize>,
}

impl ParsedElement {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    fn dimension(&self, name: &str) -> Option<u32> {
        self.attr(name)?.trim().parse().ok()
    }

    fn info(&self, selector: &str) -> ElementInfo {
        ElementInfo {
            selector: selector.to_string(),
            tag: self.tag.clone(),
            id: self.id.clone(),
            classes: self.classes.clone(),
        }
    }
}

/// Elements of a parsed template in document order
#[derive(Debug)]
struct ElementTree {
    elements: Vec<ParsedElement>,
}

impl ElementTree {
    fn parse(html: &str) -> Result<Self, ViewerError> {
        let dom = parse_document(RcDom::default(), Default::default())
            .from_utf8()
            .read_from(&mut html.as_bytes())
            .map_err(|e| ViewerError::Template(e.to_string()))?;

        let mut tree = Self {
            elements: Vec::new(),
        };
        let mut stack = Vec::new();
        tree.visit_node(&dom.document, &mut stack);
        Ok(tree)
    }

    fn visit_node(&mut self, node: &Rc<Node>, stack: &mut Vec<usize>) {
        match node.data {
            NodeData::Element {
                ref name,
                ref attrs,
                ..
            } => {
                let attrs: Vec<(String, String)> = attrs
                    .borrow()
                    .iter()
                    .map(|attr| (attr.name.local.to_string(), attr.value.to_string()))
                    .collect();
                let id = attrs
                    .iter()
                    .find(|(key, _)| key == "id")
                    .map(|(_, value)| value.clone());
                let classes = attrs
                    .iter()
                    .find(|(key, _)| key == "class")
                    .map(|(_, value)| value.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default();

                let index = self.elements.len();
                self.elements.push(ParsedElement {
                    tag: name.local.to_string().to_ascii_lowercase(),
                    id,
                    classes,
                    attrs,
                    ancestors: stack.iter().rev().copied().collect(),
                });

                stack.push(index);
                for child in node.children.borrow().iter() {
                    self.visit_node(child, stack);
                }
                stack.pop();
            }
            _ => {
                for child in node.children.borrow().iter() {
                    self.visit_node(child, stack);
                }
            }
        }
    }

    fn resolve(&self, region: &'static str, selector: &str) -> Result<&ParsedElement, ViewerError> {
        let compounds = parse_selector(selector)?;
        self.elements
            .iter()
            .find(|element| self.matches(element, &compounds))
            .ok_or_else(|| ViewerError::MissingRegion {
                region,
                selector: selector.to_string(),
            })
    }

    fn matches(&self, element: &ParsedElement, compounds: &[Compound]) -> bool {
        let Some((last, rest)) = compounds.split_last() else {
            return false;
        };
        if !last.matches(element) {
            return false;
        }

        // Descendant combinators only: greedily match the nearest ancestors
        let mut remaining = rest.iter().rev().peekable();
        for &ancestor in &element.ancestors {
            let Some(compound) = remaining.peek() else {
                break;
            };
            if compound.matches(&self.elements[ancestor]) {
                remaining.next();
            }
        }
        remaining.peek().is_none()
    }
}

/// One compound selector: `tag#id.class.class`
#[derive(Debug, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
}

impl Compound {
    fn matches(&self, element: &ParsedElement) -> bool {
        self.tag.as_ref().is_none_or(|tag| *tag == element.tag)
            && self
                .id
                .as_ref()
                .is_none_or(|id| element.id.as_deref() == Some(id.as_str()))
            && self
                .classes
                .iter()
                .all(|class| element.classes.contains(class))
    }
}

fn parse_selector(selector: &str) -> Result<Vec<Compound>, ViewerError> {
    let invalid = || ViewerError::InvalidSelector(selector.to_string());

    let compounds = selector
        .split_whitespace()
        .map(|token| parse_compound(token).ok_or_else(invalid))
        .collect::<Result<Vec<_>, _>>()?;

    if compounds.is_empty() {
        return Err(invalid());
    }
    Ok(compounds)
}

fn parse_compound(token: &str) -> Option<Compound> {
    let mut compound = Compound::default();
    let mut rest = token;

    if let Some(after) = rest.strip_prefix('*') {
        rest = after;
    } else {
        let end = rest.find(['.', '#']).unwrap_or(rest.len());
        if end > 0 {
            compound.tag = Some(identifier(&rest[..end])?.to_ascii_lowercase());
        }
        rest = &rest[end..];
    }

    while let Some(marker) = rest.chars().next() {
        let body = &rest[marker.len_utf8()..];
        let end = body.find(['.', '#']).unwrap_or(body.len());
        let name = identifier(&body[..end])?.to_string();
        match marker {
            '.' => compound.classes.push(name),
            '#' if compound.id.is_none() => compound.id = Some(name),
            _ => return None,
        }
        rest = &body[end..];
    }

    Some(compound)
}

fn identifier(name: &str) -> Option<&str> {
    let valid = !name.is_empty()
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    valid.then_some(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_template_binds_all_regions() {
        let regions = bind_regions(DEFAULT_TEMPLATE, &RegionSelectors::default()).expect("bind");
        assert_eq!(regions.canvas.info().tag, "canvas");
        assert_eq!(regions.text_layer.info().classes, vec!["textLayer"]);
        assert_eq!(regions.annotation_layer.info().selector, ".annotationLayer");
        assert_eq!(regions.progress.info().tag, "div");
        assert!(regions.loading.lock().visible);

        let canvas = regions.canvas.lock();
        assert_eq!(canvas.backing.dimensions(), (300, 150));
        assert_eq!(canvas.css_width, 300.0);
    }

    #[test]
    fn custom_template_with_descendant_selectors() {
        let template = r#"
            <section id="viewer">
              <header><div class="bar"><span class="fill"></span></div></header>
              <p class="spinner" hidden>wait</p>
              <canvas id="page" width="640" height="480"></canvas>
              <div class="layer text"></div>
              <div class="layer links"></div>
            </section>"#;
        let selectors = RegionSelectors {
            canvas: "#viewer canvas#page".into(),
            text_layer: ".layer.text".into(),
            annotation_layer: "section .links".into(),
            progress: "header .bar span.fill".into(),
            loading: "p.spinner".into(),
        };

        let regions = bind_regions(template, &selectors).expect("bind");
        assert_eq!(regions.canvas.info().id.as_deref(), Some("page"));
        assert_eq!(regions.canvas.lock().backing.dimensions(), (640, 480));
        assert_eq!(regions.progress.info().tag, "span");
        assert_eq!(regions.annotation_layer.info().classes, vec!["layer", "links"]);
        assert!(!regions.loading.lock().visible);
    }

    #[test]
    fn uppercase_markup_matches_lowercase_selectors() {
        let template = r#"
            <CANVAS ID="page"></CANVAS>
            <DIV CLASS="textLayer"></DIV>
            <DIV CLASS="annotationLayer"></DIV>
            <DIV CLASS="progress"><DIV CLASS="progress-bar"></DIV></DIV>
            <DIV CLASS="loading"></DIV>"#;
        let selectors = RegionSelectors {
            canvas: "canvas#page".into(),
            ..RegionSelectors::default()
        };

        let regions = bind_regions(template, &selectors).expect("bind");
        assert_eq!(regions.canvas.info().tag, "canvas");
        assert_eq!(regions.text_layer.info().tag, "div");
    }

    #[test]
    fn missing_region_fails_fast() {
        let template = r#"<canvas></canvas><div class="textLayer"></div>"#;
        let err = bind_regions(template, &RegionSelectors::default()).expect_err("incomplete");
        assert!(matches!(
            err,
            ViewerError::MissingRegion {
                region: "annotation_layer",
                ..
            }
        ));
    }

    #[test]
    fn descendant_selector_requires_ancestor() {
        let template = r#"<div class="a"></div><div class="b"><span class="c"></span></div>"#;
        let tree = ElementTree::parse(template).expect("parse");
        assert!(tree.resolve("x", ".b .c").is_ok());
        assert!(tree.resolve("x", ".a .c").is_err());
    }

    #[test]
    fn invalid_selectors_are_rejected() {
        for selector in ["", "   ", "div > p", ".", "#a#b", "[x]", ".9lives"] {
            assert!(
                matches!(parse_selector(selector), Err(ViewerError::InvalidSelector(_))),
                "{selector:?} should be rejected"
            );
        }
    }

    #[test]
    fn compound_selector_parts() {
        let compounds = parse_selector("div#main.a.b *.c").expect("valid");
        assert_eq!(
            compounds,
            vec![
                Compound {
                    tag: Some("div".into()),
                    id: Some("main".into()),
                    classes: vec!["a".into(), "b".into()],
                },
                Compound {
                    tag: None,
                    id: None,
                    classes: vec!["c".into()],
                },
            ]
        );
    }
}
