// src/services/document.rs

//! Queries over static HTML documents.
//!
//! Every function takes the raw HTML and parses it on the spot; parsed
//! trees never outlive a call. Elements are addressed by their position
//! in document order, which is stable for a given HTML string.

use std::collections::HashMap;

use scraper::{ElementRef, Html};
use url::Url;

use crate::error::{AppError, Result};
use crate::models::Target;
use crate::services::fetch::Method;
use crate::services::parse_selector;
use crate::services::parser::normalize_text;
use crate::utils::{is_workable_href, resolve_url};

/// Position of an element in document order.
pub type ElementId = usize;

/// Values set by `fill` and `check` on the current document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldState {
    pub values: HashMap<ElementId, String>,
    pub checked: HashMap<ElementId, bool>,
}

/// A form ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormSubmission {
    pub method: Method,
    pub url: String,
    pub fields: Vec<(String, String)>,
}

/// What clicking an element does to a static document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Activation {
    /// Navigate to an absolute URL
    Follow(String),
    /// Submit the enclosing form
    Submit(FormSubmission),
    /// Flip a checkbox or select a radio button
    Toggle(ElementId),
    /// Client-side behaviour only
    Inert,
}

const NON_TEXT_TAGS: &[&str] = &["script", "style", "noscript", "template", "head"];
const SKIPPED_INPUT_TYPES: &[&str] = &["submit", "image", "button", "reset", "file"];

struct Document {
    html: Html,
}

impl Document {
    fn parse(html: &str) -> Self {
        Self {
            html: Html::parse_document(html),
        }
    }

    fn elements(&self) -> Vec<ElementRef<'_>> {
        self.html
            .root_element()
            .descendants()
            .filter_map(ElementRef::wrap)
            .collect()
    }

    fn position(&self, element: ElementRef<'_>) -> Option<ElementId> {
        self.elements().iter().position(|e| e.id() == element.id())
    }

    fn element(&self, id: ElementId) -> Option<ElementRef<'_>> {
        self.elements().get(id).copied()
    }

    fn content_root(&self) -> Result<ElementRef<'_>> {
        let body = parse_selector("body")?;
        Ok(self
            .html
            .select(&body)
            .next()
            .unwrap_or_else(|| self.html.root_element()))
    }

    fn locate(&self, target: &Target) -> Result<Option<ElementId>> {
        let found = match target {
            Target::Selector(css) => {
                let sel = parse_selector(css)?;
                self.html.select(&sel).next()
            }
            Target::Text(text) => self.locate_text(text)?,
            Target::Within {
                container,
                index,
                selector,
            } => {
                let container_sel = parse_selector(container)?;
                let inner_sel = parse_selector(selector)?;
                self.html
                    .select(&container_sel)
                    .nth(*index)
                    .and_then(|c| c.select(&inner_sel).next())
            }
        };
        Ok(found.and_then(|element| self.position(element)))
    }

    /// Clickable elements first, then the tightest element whose text matches.
    fn locate_text(&self, text: &str) -> Result<Option<ElementRef<'_>>> {
        let needle = normalize_text(text).to_lowercase();
        if needle.is_empty() {
            return Ok(None);
        }
        let root = self.content_root()?;
        let candidates: Vec<(ElementRef<'_>, String)> = root
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|e| !NON_TEXT_TAGS.contains(&e.value().name()))
            .map(|e| (e, element_text(e).to_lowercase()))
            .filter(|(_, t)| t.contains(&needle))
            .collect();

        if let Some((element, _)) = candidates.iter().find(|(e, _)| is_clickable(*e)) {
            return Ok(Some(*element));
        }

        let mut best: Option<(ElementRef<'_>, usize)> = None;
        for (element, text) in &candidates {
            // Descendants come later in document order, so ties go to the deeper element
            if best.is_none_or(|(_, len)| text.len() <= len) {
                best = Some((*element, text.len()));
            }
        }
        Ok(best.map(|(element, _)| element))
    }

    fn by_html_id(&self, id: &str) -> Option<ElementRef<'_>> {
        self.elements()
            .into_iter()
            .find(|e| e.value().attr("id") == Some(id))
    }

    /// The checkbox or radio a click on `element` would toggle.
    fn toggle_control<'a>(&'a self, element: ElementRef<'a>) -> Option<ElementRef<'a>> {
        if is_toggle(element) {
            return Some(element);
        }
        if element.value().name() != "label" {
            return None;
        }
        let control = match element.value().attr("for") {
            Some(id) => self.by_html_id(id),
            None => element
                .descendants()
                .filter_map(ElementRef::wrap)
                .find(|e| e.value().name() == "input"),
        };
        control.filter(|c| is_toggle(*c))
    }

    fn enclosing_form<'a>(&'a self, element: ElementRef<'a>) -> Option<ElementRef<'a>> {
        if let Some(form_id) = element.value().attr("form") {
            return self.by_html_id(form_id);
        }
        element
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|e| e.value().name() == "form")
    }

    fn activation(&self, id: ElementId, base: &Url, fields: &FieldState) -> Option<Activation> {
        let element = self.element(id)?;
        let chain = std::iter::once(element).chain(element.ancestors().filter_map(ElementRef::wrap));

        for candidate in chain {
            let name = candidate.value().name();
            if name == "a" {
                if let Some(href) = candidate.value().attr("href") {
                    return Some(if is_workable_href(href) {
                        Activation::Follow(resolve_url(base, href.trim()))
                    } else {
                        Activation::Inert
                    });
                }
            }
            if let Some(control) = self.toggle_control(candidate) {
                return Some(
                    self.position(control)
                        .map(Activation::Toggle)
                        .unwrap_or(Activation::Inert),
                );
            }
            if is_submitter(candidate) {
                return Some(
                    self.enclosing_form(candidate)
                        .map(|form| {
                            Activation::Submit(self.submission(form, Some(candidate), base, fields))
                        })
                        .unwrap_or(Activation::Inert),
                );
            }
            if name == "button" || name == "label" {
                return Some(Activation::Inert);
            }
        }
        Some(Activation::Inert)
    }

    fn submission(
        &self,
        form: ElementRef<'_>,
        submitter: Option<ElementRef<'_>>,
        base: &Url,
        fields: &FieldState,
    ) -> FormSubmission {
        let method = match form.value().attr("method").map(str::to_ascii_lowercase) {
            Some(m) if m == "post" => Method::Post,
            _ => Method::Get,
        };
        let action = form
            .value()
            .attr("action")
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(|a| resolve_url(base, a))
            .unwrap_or_else(|| base.to_string());

        let mut pairs = Vec::new();
        let controls = form
            .descendants()
            .filter_map(ElementRef::wrap)
            .filter(|e| matches!(e.value().name(), "input" | "select" | "textarea" | "button"));

        for control in controls {
            let el = control.value();
            let Some(name) = el.attr("name").filter(|n| !n.is_empty()) else {
                continue;
            };
            if el.attr("disabled").is_some() {
                continue;
            }
            let position = self.position(control);
            let overridden = position.and_then(|p| fields.values.get(&p)).cloned();

            match el.name() {
                "input" => {
                    let kind = input_type(control);
                    if kind == "checkbox" || kind == "radio" {
                        let checked = position
                            .and_then(|p| fields.checked.get(&p).copied())
                            .unwrap_or_else(|| el.attr("checked").is_some());
                        if checked {
                            pairs.push((name.to_string(), el.attr("value").unwrap_or("on").to_string()));
                        }
                    } else if SKIPPED_INPUT_TYPES.contains(&kind.as_str()) {
                        if submitter.is_some_and(|s| s.id() == control.id()) {
                            pairs.push((name.to_string(), el.attr("value").unwrap_or("").to_string()));
                        }
                    } else {
                        let value = overridden.unwrap_or_else(|| el.attr("value").unwrap_or("").to_string());
                        pairs.push((name.to_string(), value));
                    }
                }
                "textarea" => {
                    let value = overridden.unwrap_or_else(|| control.text().collect());
                    pairs.push((name.to_string(), value));
                }
                "select" => {
                    let value = overridden.or_else(|| selected_option(control));
                    if let Some(value) = value {
                        pairs.push((name.to_string(), value));
                    }
                }
                _ => {
                    if submitter.is_some_and(|s| s.id() == control.id()) {
                        pairs.push((name.to_string(), el.attr("value").unwrap_or("").to_string()));
                    }
                }
            }
        }

        let url = match method {
            Method::Get => match Url::parse(&action) {
                Ok(mut url) => {
                    url.set_fragment(None);
                    url.set_query(None);
                    if !pairs.is_empty() {
                        url.query_pairs_mut().extend_pairs(&pairs);
                    }
                    pairs.clear();
                    url.to_string()
                }
                Err(_) => action,
            },
            Method::Post => action,
        };

        FormSubmission {
            method,
            url,
            fields: pairs,
        }
    }
}

fn input_type(element: ElementRef<'_>) -> String {
    element
        .value()
        .attr("type")
        .map(str::to_ascii_lowercase)
        .unwrap_or_else(|| "text".to_string())
}

fn is_toggle(element: ElementRef<'_>) -> bool {
    element.value().name() == "input" && matches!(input_type(element).as_str(), "checkbox" | "radio")
}

fn is_submitter(element: ElementRef<'_>) -> bool {
    match element.value().name() {
        "button" => !matches!(
            element.value().attr("type").map(str::to_ascii_lowercase).as_deref(),
            Some("button") | Some("reset")
        ),
        "input" => matches!(input_type(element).as_str(), "submit" | "image"),
        _ => false,
    }
}

fn is_clickable(element: ElementRef<'_>) -> bool {
    let el = element.value();
    match el.name() {
        "a" | "button" | "label" => true,
        "input" => matches!(
            input_type(element).as_str(),
            "submit" | "button" | "reset" | "image"
        ),
        _ => el.attr("role") == Some("button"),
    }
}

fn is_fillable(element: ElementRef<'_>) -> bool {
    match element.value().name() {
        "textarea" | "select" => true,
        "input" => {
            let kind = input_type(element);
            kind != "checkbox" && kind != "radio" && !SKIPPED_INPUT_TYPES.contains(&kind.as_str())
        }
        _ => false,
    }
}

fn selected_option(select: ElementRef<'_>) -> Option<String> {
    let options: Vec<ElementRef<'_>> = select
        .descendants()
        .filter_map(ElementRef::wrap)
        .filter(|e| e.value().name() == "option")
        .collect();
    let chosen = options
        .iter()
        .find(|o| o.value().attr("selected").is_some())
        .or_else(|| options.first())?;
    Some(
        chosen
            .value()
            .attr("value")
            .map(str::to_string)
            .unwrap_or_else(|| normalize_text(&chosen.text().collect::<String>())),
    )
}

/// Rendered text of an element, skipping script and style content.
fn visible_text(element: ElementRef<'_>) -> String {
    let mut out = String::new();
    for node in element.descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node
            .ancestors()
            .filter_map(ElementRef::wrap)
            .any(|a| NON_TEXT_TAGS.contains(&a.value().name()));
        if !hidden {
            out.push_str(text);
            out.push(' ');
        }
    }
    normalize_text(&out)
}

fn element_text(element: ElementRef<'_>) -> String {
    if element.value().name() == "input" {
        return normalize_text(element.value().attr("value").unwrap_or(""));
    }
    visible_text(element)
}

/// Whether `haystack` loosely contains `needle`.
pub fn loose_contains(haystack: &str, needle: &str) -> bool {
    let needle = normalize_text(needle).to_lowercase();
    !needle.is_empty() && normalize_text(haystack).to_lowercase().contains(&needle)
}

/// Number of elements matching `selector`.
pub fn count(html: &str, selector: &str) -> Result<usize> {
    let sel = parse_selector(selector)?;
    Ok(Html::parse_document(html).select(&sel).count())
}

/// Locate the element a target refers to.
pub fn locate(html: &str, target: &Target) -> Result<Option<ElementId>> {
    Document::parse(html).locate(target)
}

/// Normalized text of an element; the `value` of inputs.
pub fn text_at(html: &str, id: ElementId) -> Option<String> {
    Document::parse(html).element(id).map(element_text)
}

/// Attribute value of an element.
pub fn attr_at(html: &str, id: ElementId, name: &str) -> Option<String> {
    Document::parse(html)
        .element(id)
        .and_then(|e| e.value().attr(name).map(str::to_string))
}

/// Visible text of the whole document.
pub fn body_text(html: &str) -> String {
    let doc = Document::parse(html);
    match doc.content_root() {
        Ok(root) => visible_text(root),
        Err(_) => visible_text(doc.html.root_element()),
    }
}

/// Title of the document, if any.
pub fn title(html: &str) -> Option<String> {
    let sel = parse_selector("title").ok()?;
    Html::parse_document(html)
        .select(&sel)
        .next()
        .map(|t| normalize_text(&t.text().collect::<String>()))
        .filter(|t| !t.is_empty())
}

/// What clicking the element at `id` does.
pub fn activation(html: &str, id: ElementId, base: &Url, fields: &FieldState) -> Result<Activation> {
    Document::parse(html)
        .activation(id, base, fields)
        .ok_or_else(|| AppError::validation(format!("element #{id} no longer exists")))
}

/// Whether the element at `id` accepts typed values.
pub fn fillable(html: &str, id: ElementId) -> bool {
    Document::parse(html).element(id).is_some_and(is_fillable)
}

/// Checkbox or radio controlled by the element at `id`, with its current
/// state and, for radios, the other members of its group.
pub fn toggle_control(
    html: &str,
    id: ElementId,
    fields: &FieldState,
) -> Option<(ElementId, bool, Vec<ElementId>)> {
    let doc = Document::parse(html);
    let control = doc.toggle_control(doc.element(id)?)?;
    let control_id = doc.position(control)?;
    let checked = fields
        .checked
        .get(&control_id)
        .copied()
        .unwrap_or_else(|| control.value().attr("checked").is_some());

    let mut group = Vec::new();
    if input_type(control) == "radio" {
        if let Some(name) = control.value().attr("name") {
            group = doc
                .elements()
                .iter()
                .enumerate()
                .filter(|(pos, e)| {
                    *pos != control_id
                        && is_toggle(**e)
                        && input_type(**e) == "radio"
                        && e.value().attr("name") == Some(name)
                })
                .map(|(pos, _)| pos)
                .collect();
        }
    }
    Some((control_id, checked, group))
}

/// Whether the control at `id` is a radio button.
pub fn is_radio(html: &str, id: ElementId) -> bool {
    Document::parse(html)
        .element(id)
        .is_some_and(|e| is_toggle(e) && input_type(e) == "radio")
}
