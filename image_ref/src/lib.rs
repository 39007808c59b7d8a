//! Container image references based on [reference.go](https://github.com/distribution/distribution/blob/v2.7.1/reference/reference.go):
//!
//! ```txt
//! reference        := name [ ":" tag ] [ "@" digest ]
//! name             := [registry '/'] path-component ['/' path-component]*
//! registry         := domain [':' port-number]
//! path-component   := alpha-numeric [separator alpha-numeric]*
//! separator        := /[_.]|__|[-]*/
//! tag              := /[\w][\w.-]{0,127}/
//! digest           := digest-algorithm ":" digest-hex
//! digest-hex       := /[0-9a-fA-F]{32,}/
//! ```
//!
//! Release tooling only ever needs to take a reference apart (is this base image valid, what
//! is the hex of this digest) and to put one together (repository plus tag, repository plus
//! digest), so that is all this crate offers.

use std::{borrow::Cow, fmt, str::FromStr, sync::LazyLock};

#[cfg(feature = "serde")]
use ::serde::{Deserialize, Deserializer, Serialize, Serializer};
use regex::Regex;

#[derive(Debug, PartialEq, Eq)]
pub struct InvalidImageRef(String);

impl std::error::Error for InvalidImageRef {}

impl fmt::Display for InvalidImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid container image reference: {:?}", self.0)
    }
}

const REGISTRY_SUFFIX: char = '/';
const TAG_PREFIX: char = ':';
const DIGEST_PREFIX: char = '@';
const DIGEST_HEX_PREFIX: char = ':';

#[derive(Copy, Clone, Debug)]
struct Span {
    start: usize,
    end: usize,
}

impl Span {
    fn of(m: regex::Match<'_>) -> Self {
        Self {
            start: m.start(),
            end: m.end(),
        }
    }

    fn slice(self, buffer: &str) -> &str {
        &buffer[self.start..self.end]
    }
}

#[derive(Copy, Clone, Debug)]
struct Spans {
    registry: Option<Span>,
    domain: Option<Span>,
    port: Option<Span>,
    path: Span,
    tag: Option<Span>,
    digest: Option<Span>,
    algorithm: Option<Span>,
    hex: Option<Span>,
}

impl Spans {
    fn parse(s: &str) -> Option<Self> {
        static REFERENCE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
            Regex::new(concat!(
                r"^",
                r"(?:(?P<registry>(?P<domain>localhost|[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]*[a-zA-Z0-9])?)+)(?::(?P<port>[0-9]+))?)/)?",
                r"(?P<path>[a-z0-9]+(?:(?:[_.]|__|-*)[a-z0-9]+)*(?:/[a-z0-9]+(?:(?:[_.]|__|-*)[a-z0-9]+)*)*)",
                r"(?::(?P<tag>[\w][\w.-]{0,127}))?",
                r"(?:@(?P<digest>(?P<algorithm>[A-Za-z][A-Za-z0-9]*(?:[-_+.][A-Za-z][A-Za-z0-9]*)*):(?P<hex>[0-9a-fA-F]{32,})))?",
                r"$"
            ))
            .expect("reference regex is valid")
        });

        let captures = REFERENCE_REGEX.captures(s)?;
        let span = |name: &str| captures.name(name).map(Span::of);
        Some(Self {
            registry: span("registry"),
            domain: span("domain"),
            port: span("port"),
            path: span("path")?,
            tag: span("tag"),
            digest: span("digest"),
            algorithm: span("algorithm"),
            hex: span("hex"),
        })
    }
}

/// A parsed container image reference, written as:
/// ```txt
/// <domain>:<port>/<path>:<tag>@<algorithm>:<hex>
/// <registry----->/<path>:<tag>@<digest--------->
/// ```
/// Only `<path>` is required.
#[derive(Clone)]
pub struct ImageRef {
    buffer: String,
    spans: Spans,
}

impl ImageRef {
    pub fn parse(value: impl Into<String>) -> Result<Self, InvalidImageRef> {
        let buffer = value.into();
        match Spans::parse(&buffer) {
            Some(spans) => Ok(Self { buffer, spans }),
            None => Err(InvalidImageRef(buffer)),
        }
    }

    pub fn builder<'a>(path: impl Into<Cow<'a, str>>) -> ImageRefBuilder<'a> {
        ImageRefBuilder::new(path)
    }

    /// Starts a builder from the registry and path of this reference. Tag and digest are
    /// carried over as well and can be replaced.
    pub fn to_builder(&self) -> ImageRefBuilder<'_> {
        let mut builder = ImageRefBuilder::new(self.path());
        builder.registry = self.registry().map(Cow::Borrowed);
        builder.tag = self.tag().map(Cow::Borrowed);
        builder.digest = self.digest().map(Cow::Borrowed);
        builder
    }

    pub fn domain(&self) -> Option<&str> {
        self.spans.domain.map(|span| span.slice(&self.buffer))
    }

    pub fn port(&self) -> Option<&str> {
        self.spans.port.map(|span| span.slice(&self.buffer))
    }

    /// Returns `<domain>(:<port>)?`.
    pub fn registry(&self) -> Option<&str> {
        self.spans.registry.map(|span| span.slice(&self.buffer))
    }

    pub fn path(&self) -> &str {
        self.spans.path.slice(&self.buffer)
    }

    /// Returns `(<registry>/)?<path>`, the reference without tag and digest.
    pub fn repository(&self) -> &str {
        &self.buffer[..self.spans.path.end]
    }

    pub fn tag(&self) -> Option<&str> {
        self.spans.tag.map(|span| span.slice(&self.buffer))
    }

    /// Returns `<algorithm>:<hex>`.
    pub fn digest(&self) -> Option<&str> {
        self.spans.digest.map(|span| span.slice(&self.buffer))
    }

    pub fn digest_algorithm(&self) -> Option<&str> {
        self.spans.algorithm.map(|span| span.slice(&self.buffer))
    }

    pub fn digest_hex(&self) -> Option<&str> {
        self.spans.hex.map(|span| span.slice(&self.buffer))
    }

    pub fn as_str(&self) -> &str {
        &self.buffer
    }
}

/// Splits `<algorithm>:<hex>` into its parts. Returns `None` when there is no algorithm
/// prefix.
pub fn split_digest(digest: &str) -> Option<(&str, &str)> {
    digest
        .split_once(DIGEST_HEX_PREFIX)
        .filter(|(algorithm, hex)| !algorithm.is_empty() && !hex.is_empty())
}

impl PartialEq for ImageRef {
    fn eq(&self, other: &Self) -> bool {
        self.buffer == other.buffer
    }
}

impl Eq for ImageRef {}

impl std::hash::Hash for ImageRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.buffer.hash(state);
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.buffer, f)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.buffer)
    }
}

impl FromStr for ImageRef {
    type Err = InvalidImageRef;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ImageRef {
    type Error = InvalidImageRef;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ImageRef> for String {
    fn from(value: ImageRef) -> Self {
        value.buffer
    }
}

#[cfg(feature = "serde")]
impl Serialize for ImageRef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.buffer)
    }
}

#[cfg(feature = "serde")]
impl<'de> Deserialize<'de> for ImageRef {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        Self::parse(String::deserialize(deserializer)?).map_err(::serde::de::Error::custom)
    }
}

pub struct ImageRefBuilder<'a> {
    registry: Option<Cow<'a, str>>,
    path: Cow<'a, str>,
    tag: Option<Cow<'a, str>>,
    digest: Option<Cow<'a, str>>,
}

impl<'a> ImageRefBuilder<'a> {
    fn new(path: impl Into<Cow<'a, str>>) -> Self {
        Self {
            registry: None,
            path: path.into(),
            tag: None,
            digest: None,
        }
    }

    pub fn with_registry(mut self, registry: impl Into<Cow<'a, str>>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<Cow<'a, str>>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<Cow<'a, str>>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn without_tag(mut self) -> Self {
        self.tag = None;
        self
    }

    pub fn with_digest(mut self, digest: impl Into<Cow<'a, str>>) -> Self {
        self.digest = Some(digest.into());
        self
    }

    pub fn without_digest(mut self) -> Self {
        self.digest = None;
        self
    }

    pub fn build(self) -> Result<ImageRef, InvalidImageRef> {
        let len = self.registry.as_ref().map_or(0, |x| x.len() + 1)
            + self.path.len()
            + self.tag.as_ref().map_or(0, |x| x.len() + 1)
            + self.digest.as_ref().map_or(0, |x| x.len() + 1);
        let mut buffer = String::with_capacity(len);

        if let Some(registry) = self.registry {
            buffer.push_str(&registry);
            buffer.push(REGISTRY_SUFFIX);
        }
        buffer.push_str(&self.path);
        if let Some(tag) = self.tag {
            buffer.push(TAG_PREFIX);
            buffer.push_str(&tag);
        }
        if let Some(digest) = self.digest {
            buffer.push(DIGEST_PREFIX);
            buffer.push_str(&digest);
        }
        ImageRef::parse(buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEX: &str = "01234567aaaaaaaa01234567aaaaaaaa";

    #[test]
    fn parses_path_only() {
        let image = ImageRef::parse("org-name/img-name").unwrap();
        assert_eq!(image.registry(), None);
        assert_eq!(image.path(), "org-name/img-name");
        assert_eq!(image.repository(), "org-name/img-name");
        assert_eq!(image.tag(), None);
        assert_eq!(image.digest(), None);
    }

    #[test]
    fn parses_registry_port_and_tag() {
        let image = ImageRef::parse("reg.io:12345/org-name/img-name:latest").unwrap();
        assert_eq!(image.domain(), Some("reg.io"));
        assert_eq!(image.port(), Some("12345"));
        assert_eq!(image.registry(), Some("reg.io:12345"));
        assert_eq!(image.path(), "org-name/img-name");
        assert_eq!(image.repository(), "reg.io:12345/org-name/img-name");
        assert_eq!(image.tag(), Some("latest"));
    }

    #[test]
    fn parses_digest() {
        let image = ImageRef::parse(format!("123.dkr.ecr.us-east-1.amazonaws.com/ns/api@sha256:{HEX}"))
            .unwrap();
        assert_eq!(image.registry(), Some("123.dkr.ecr.us-east-1.amazonaws.com"));
        assert_eq!(image.path(), "ns/api");
        assert_eq!(image.tag(), None);
        assert_eq!(image.digest(), Some(format!("sha256:{HEX}").as_str()));
        assert_eq!(image.digest_algorithm(), Some("sha256"));
        assert_eq!(image.digest_hex(), Some(HEX));
    }

    #[test]
    fn parses_localhost_registry() {
        let image = ImageRef::parse("localhost:5000/base:1").unwrap();
        assert_eq!(image.registry(), Some("localhost:5000"));
        assert_eq!(image.path(), "base");
    }

    #[test]
    fn rejects_invalid_references() {
        assert!(ImageRef::parse(".").is_err());
        assert!(ImageRef::parse("a@sha256:1234").is_err()); // digest too short
        assert!(ImageRef::parse("BASE_URL/base:latest").is_err());
        assert!(ImageRef::parse("Upper/case").is_err());
    }

    #[test]
    fn builds_from_parts() {
        let image = ImageRef::builder("ns/api")
            .with_registry("reg.io")
            .with_tag("v1")
            .build()
            .unwrap();
        assert_eq!(image.as_str(), "reg.io/ns/api:v1");

        let pinned = image
            .to_builder()
            .without_tag()
            .with_digest(format!("sha256:{HEX}"))
            .build()
            .unwrap();
        assert_eq!(pinned.as_str(), format!("reg.io/ns/api@sha256:{HEX}"));
    }

    #[test]
    fn build_validates() {
        assert!(ImageRef::builder("ns/API").build().is_err());
    }

    #[test]
    fn splits_digest() {
        assert_eq!(split_digest("sha256:abc"), Some(("sha256", "abc")));
        assert_eq!(split_digest("abc"), None);
        assert_eq!(split_digest(":abc"), None);
    }

    #[cfg(feature = "serde")]
    #[test]
    fn serde_uses_string_form() {
        let image = ImageRef::parse("org-name/img-name").unwrap();
        let ser = r#""org-name/img-name""#;
        assert_eq!(serde_json::to_string(&image).unwrap(), ser);
        assert_eq!(serde_json::from_str::<ImageRef>(ser).unwrap(), image);
        assert!(serde_json::from_str::<ImageRef>(r#"".""#).is_err());
    }
}
