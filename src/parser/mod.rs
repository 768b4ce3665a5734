//! Markdown parsing into typed segments.
//!
//! The parser walks the pulldown-cmark event stream and emits an ordered
//! sequence of segments: plain text, fenced code, and media references.
//! Every segment carries the heading breadcrumb stack that was active
//! where it appeared.

use pulldown_cmark::{CodeBlockKind, Event, Options, Parser, Tag, TagEnd};
use serde::{Deserialize, Serialize};

/// Kind of parsed segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentType {
    Text,
    Code,
    ImageRef,
    AudioRef,
    VideoRef,
}

/// A typed slice of a Markdown document.
#[derive(Debug, Clone)]
pub struct Segment {
    pub segment_type: SegmentType,
    /// Plain text, code body, or the media reference URI/path.
    pub content: String,
    /// Heading breadcrumbs active at this segment.
    pub headers: Vec<String>,
    /// Code fence language, when present.
    pub language: Option<String>,
    /// Alt text of a media reference.
    pub alt: Option<String>,
    /// Title attribute of a media reference.
    pub title: Option<String>,
}

impl Segment {
    fn text(content: String, headers: Vec<String>) -> Self {
        Self {
            segment_type: SegmentType::Text,
            content,
            headers,
            language: None,
            alt: None,
            title: None,
        }
    }
}

const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "flac", "aac", "aiff"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm"];
const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp"];

/// Classify a path by file extension.
///
/// Returns None for paths with no recognized media extension.
pub fn classify_media_path(path: &str) -> Option<SegmentType> {
    let clean = path.split(['?', '#']).next().unwrap_or(path);
    let ext = std::path::Path::new(clean)
        .extension()?
        .to_string_lossy()
        .to_lowercase();

    if AUDIO_EXTENSIONS.contains(&ext.as_str()) {
        Some(SegmentType::AudioRef)
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        Some(SegmentType::VideoRef)
    } else if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(SegmentType::ImageRef)
    } else {
        None
    }
}

/// An embedded media reference collected while walking a paragraph.
#[derive(Debug, Clone)]
struct MediaRef {
    segment_type: SegmentType,
    target: String,
    alt: String,
    title: Option<String>,
}

/// Markdown parser emitting typed segments with heading breadcrumbs.
///
/// The parser is stateless between calls; `parse` can be invoked any
/// number of times on fresh input.
#[derive(Debug, Default)]
pub struct MarkdownNodeParser;

impl MarkdownNodeParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a Markdown string into an ordered segment sequence.
    pub fn parse(&self, input: &str) -> Vec<Segment> {
        let parser = Parser::new_ext(input, Options::empty());

        let mut segments: Vec<Segment> = Vec::new();
        let mut headers: Vec<(u32, String)> = Vec::new();

        // Paragraph accumulation state.
        let mut paragraph_text = String::new();
        let mut paragraph_images: Vec<MediaRef> = Vec::new();
        let mut in_paragraph = false;

        // Heading accumulation state.
        let mut heading_text: Option<(u32, String)> = None;

        // Code block state.
        let mut code_body: Option<(Option<String>, String)> = None;

        // Inside an image tag we collect the alt text instead of emitting.
        let mut image_alt: Option<(MediaRef, String)> = None;
        // Inside a media link we collect the anchor text for the alt.
        let mut media_link: Option<(MediaRef, String)> = None;

        let breadcrumbs =
            |headers: &[(u32, String)]| headers.iter().map(|(_, h)| h.clone()).collect::<Vec<_>>();

        // Text outside any paragraph (tight list items and the like) piles
        // up in the paragraph buffer; close it before a new block starts.
        macro_rules! flush_loose_text {
            () => {
                let loose = paragraph_text.trim().to_string();
                if !loose.is_empty() && !in_paragraph {
                    segments.push(Segment::text(loose, breadcrumbs(&headers)));
                    paragraph_text.clear();
                }
            };
        }

        for event in parser {
            match event {
                Event::Start(Tag::Heading { level, .. }) => {
                    flush_loose_text!();
                    heading_text = Some((level as u32, String::new()));
                }
                Event::End(TagEnd::Heading(_)) => {
                    if let Some((level, text)) = heading_text.take() {
                        while headers.last().is_some_and(|(l, _)| *l >= level) {
                            headers.pop();
                        }
                        headers.push((level, text.trim().to_string()));
                    }
                }
                Event::Start(Tag::Paragraph) => {
                    flush_loose_text!();
                    in_paragraph = true;
                    paragraph_text.clear();
                    paragraph_images.clear();
                }
                Event::End(TagEnd::Paragraph) => {
                    in_paragraph = false;
                    let text = paragraph_text.trim().to_string();

                    if text.is_empty() && !paragraph_images.is_empty() {
                        // Image-only block: each image is its own segment.
                        for image in paragraph_images.drain(..) {
                            segments.push(Segment {
                                segment_type: image.segment_type,
                                content: image.target,
                                headers: breadcrumbs(&headers),
                                language: None,
                                alt: Some(image.alt).filter(|a| !a.is_empty()),
                                title: image.title,
                            });
                        }
                    } else if !text.is_empty() {
                        // Inline images are absorbed as alt text.
                        let mut content = text;
                        for image in paragraph_images.drain(..) {
                            if !image.alt.is_empty() {
                                content.push(' ');
                                content.push_str(&image.alt);
                            }
                        }
                        segments.push(Segment::text(content, breadcrumbs(&headers)));
                    }
                    paragraph_images.clear();
                }
                Event::Start(Tag::CodeBlock(kind)) => {
                    flush_loose_text!();
                    let language = match kind {
                        CodeBlockKind::Fenced(lang) if !lang.is_empty() => {
                            Some(lang.to_string())
                        }
                        _ => None,
                    };
                    code_body = Some((language, String::new()));
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some((language, body)) = code_body.take() {
                        let content = body.trim_end_matches('\n').to_string();
                        if !content.is_empty() {
                            segments.push(Segment {
                                segment_type: SegmentType::Code,
                                content,
                                headers: breadcrumbs(&headers),
                                language,
                                alt: None,
                                title: None,
                            });
                        }
                    }
                }
                Event::Start(Tag::Image {
                    dest_url, title, ..
                }) => {
                    // Unknown extension in image position falls back to image.
                    let segment_type =
                        classify_media_path(&dest_url).unwrap_or(SegmentType::ImageRef);
                    image_alt = Some((
                        MediaRef {
                            segment_type,
                            target: dest_url.to_string(),
                            alt: String::new(),
                            title: Some(title.to_string()).filter(|t| !t.is_empty()),
                        },
                        String::new(),
                    ));
                }
                Event::End(TagEnd::Image) => {
                    if let Some((mut image, alt)) = image_alt.take() {
                        image.alt = alt.trim().to_string();
                        if in_paragraph {
                            paragraph_images.push(image);
                        } else {
                            segments.push(Segment {
                                segment_type: image.segment_type,
                                content: image.target,
                                headers: breadcrumbs(&headers),
                                language: None,
                                alt: Some(image.alt).filter(|a| !a.is_empty()),
                                title: image.title,
                            });
                        }
                    }
                }
                Event::Start(Tag::Link {
                    dest_url, title, ..
                }) => {
                    // A link whose target is an audio/video file becomes a
                    // media reference; other links stay textual.
                    match classify_media_path(&dest_url) {
                        Some(st @ (SegmentType::AudioRef | SegmentType::VideoRef)) => {
                            media_link = Some((
                                MediaRef {
                                    segment_type: st,
                                    target: dest_url.to_string(),
                                    alt: String::new(),
                                    title: Some(title.to_string()).filter(|t| !t.is_empty()),
                                },
                                String::new(),
                            ));
                        }
                        _ => {}
                    }
                }
                Event::End(TagEnd::Link) => {
                    if let Some((mut link, anchor)) = media_link.take() {
                        link.alt = anchor.trim().to_string();
                        // Flush any buffered paragraph text so order holds.
                        let text = paragraph_text.trim().to_string();
                        if !text.is_empty() {
                            segments.push(Segment::text(text, breadcrumbs(&headers)));
                            paragraph_text.clear();
                        }
                        segments.push(Segment {
                            segment_type: link.segment_type,
                            content: link.target,
                            headers: breadcrumbs(&headers),
                            language: None,
                            alt: Some(link.alt).filter(|a| !a.is_empty()),
                            title: link.title,
                        });
                    }
                }
                Event::Text(text) | Event::Code(text) => {
                    if let Some((_, alt)) = image_alt.as_mut() {
                        alt.push_str(&text);
                    } else if let Some((_, anchor)) = media_link.as_mut() {
                        anchor.push_str(&text);
                    } else if let Some((_, body)) = code_body.as_mut() {
                        body.push_str(&text);
                    } else if let Some((_, heading)) = heading_text.as_mut() {
                        heading.push_str(&text);
                    } else {
                        // An inline image's alt text joins the paragraph.
                        for image in paragraph_images.drain(..) {
                            if !image.alt.is_empty() {
                                paragraph_text.push_str(&image.alt);
                            }
                        }
                        paragraph_text.push_str(&text);
                    }
                }
                Event::SoftBreak | Event::HardBreak => {
                    if let Some((_, body)) = code_body.as_mut() {
                        body.push('\n');
                    } else if heading_text.is_none() && image_alt.is_none() {
                        paragraph_text.push(' ');
                    }
                }
                _ => {}
            }
        }

        // Loose text outside any paragraph (e.g. list items flushed above).
        let trailing = paragraph_text.trim().to_string();
        if !trailing.is_empty() {
            segments.push(Segment::text(trailing, breadcrumbs(&headers)));
        }

        segments
    }
}
