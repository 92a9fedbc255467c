//! HAL / HAL-FORMS response envelopes.
//!
//! Every body the service emits goes through [`HalResource`]: `_links.self`
//! is set by construction, `_templates` only carries the affordances the
//! caller is currently allowed to use, and collections add `_embedded` items
//! plus cursor metadata.

mod template;

pub use template::{OptionItem, Property, PropertyOptions, Template};

use std::collections::BTreeMap;

use axum::{
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::models::paging::Paginated;

/// Media type of every HAL body this service renders.
pub const HAL_JSON: &str = "application/hal+json";
/// HAL-FORMS media type, accepted as an equivalent of [`HAL_JSON`].
pub const HAL_FORMS_JSON: &str = "application/prs.hal-forms+json";

/// A single hypermedia link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub href: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub templated: bool,
}

impl Link {
    pub fn new(href: impl Into<String>) -> Self {
        Self {
            href: href.into(),
            title: None,
            templated: false,
        }
    }

    pub fn titled(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }
}

pub type Links = BTreeMap<String, Link>;
pub type Templates = BTreeMap<String, Template>;

/// Cursor metadata carried by every collection.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T: Serialize> {
    pub next: Option<String>,
    pub previous: Option<String>,
    pub current: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    pub limit: usize,
    #[serde(flatten)]
    pub fields: T,
}

/// A HAL resource: links, embedded resources, templates and the resource's own fields.
#[derive(Debug, Clone, Serialize)]
pub struct HalResource<T: Serialize> {
    #[serde(rename = "_links")]
    links: Links,
    #[serde(rename = "_embedded", skip_serializing_if = "BTreeMap::is_empty")]
    embedded: BTreeMap<String, Vec<sonic_rs::Value>>,
    #[serde(rename = "_templates", skip_serializing_if = "BTreeMap::is_empty")]
    templates: Templates,
    #[serde(flatten)]
    fields: T,
}

impl<T: Serialize> HalResource<T> {
    /// Creates a resource whose `self` link points at `self_href`.
    pub fn new(self_href: impl Into<String>, fields: T) -> Self {
        let mut links = Links::new();
        links.insert("self".to_string(), Link::new(self_href));

        Self {
            links,
            embedded: BTreeMap::new(),
            templates: Templates::new(),
            fields,
        }
    }

    pub fn link(mut self, rel: impl Into<String>, link: Link) -> Self {
        self.links.insert(rel.into(), link);
        self
    }

    /// Adds a link only when `allowed` holds.
    pub fn link_if(self, allowed: bool, rel: impl Into<String>, link: Link) -> Self {
        if allowed { self.link(rel, link) } else { self }
    }

    pub fn template(mut self, name: impl Into<String>, template: Template) -> Self {
        self.templates.insert(name.into(), template);
        self
    }

    /// Adds a template only when `allowed` holds. A denied affordance is
    /// omitted, never rendered as disabled.
    pub fn template_if(self, allowed: bool, name: impl Into<String>, template: Template) -> Self {
        if allowed { self.template(name, template) } else { self }
    }

    /// Embeds an ordered sequence of sub-resources under `rel`.
    pub fn embed<E: Serialize>(mut self, rel: impl Into<String>, items: Vec<HalResource<E>>) -> crate::error::Result<Self> {
        let values = items
            .iter()
            .map(sonic_rs::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.embedded.insert(rel.into(), values);
        Ok(self)
    }

    pub fn links(&self) -> &Links {
        &self.links
    }

    pub fn templates(&self) -> &Templates {
        &self.templates
    }

    pub fn fields(&self) -> &T {
        &self.fields
    }
}

impl<T: Serialize + Default> HalResource<Page<T>> {
    /// Builds a collection resource from a cursor page.
    ///
    /// `next` / `previous` links are derived from the page's cursors against
    /// `self_href`.
    pub fn collection<I, E, F>(
        self_href: &str,
        rel: &str,
        page: Paginated<I>,
        mut render: F,
    ) -> crate::error::Result<Self>
    where
        E: Serialize,
        F: FnMut(I) -> HalResource<E>,
    {
        let Paginated {
            items,
            next,
            previous,
            current,
            total,
            limit,
        } = page;

        let self_link = match &current {
            Some(cursor) => format!("{self_href}?cursor={cursor}&limit={limit}"),
            None => format!("{self_href}?limit={limit}"),
        };

        let mut resource = HalResource::new(
            self_link,
            Page {
                next: next.clone(),
                previous: previous.clone(),
                current,
                total,
                limit,
                fields: T::default(),
            },
        );

        if let Some(cursor) = next {
            resource = resource.link("next", Link::new(format!("{self_href}?cursor={cursor}&limit={limit}")));
        }
        if let Some(cursor) = previous {
            resource = resource.link("prev", Link::new(format!("{self_href}?cursor={cursor}&limit={limit}")));
        }

        let rendered: Vec<HalResource<E>> = items.into_iter().map(&mut render).collect();
        resource.embed(rel, rendered)
    }
}

impl<T: Serialize> IntoResponse for HalResource<T> {
    fn into_response(self) -> Response {
        render(StatusCode::OK, &self)
    }
}

/// Serializes `body` as `application/hal+json` with the given status.
pub fn render<B: Serialize>(status: StatusCode, body: &B) -> Response {
    match sonic_rs::to_string(body) {
        Ok(json) => {
            let mut response = (status, json).into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(HAL_JSON));
            response
        }
        Err(e) => {
            tracing::error!("HAL serialization failed: {}", e);
            let mut response = (
                StatusCode::INTERNAL_SERVER_ERROR,
                r#"{"_links":{"index":{"href":"/"}},"status":500,"title":"Internal Server Error","message":"Internal server error"}"#,
            )
                .into_response();
            response
                .headers_mut()
                .insert(header::CONTENT_TYPE, HeaderValue::from_static(HAL_JSON));
            response
        }
    }
}
