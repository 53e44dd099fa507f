//! Media descriptor resolution.
//!
//! Attachments are inspected in a fixed priority order: video, photo,
//! document, animation. The first one present wins. Documents are only
//! accepted when their extension or content type is on the allow-list, and
//! that match also decides their kind.

use std::path::Path;

use stashbot_gateway_protocol::{Attachment, InboundEvent};
use tracing::debug;

use super::{MediaDescriptor, MediaKind, Resolution, sanitize_file_name};
use crate::config::PerKind;

/// Kinds checked against the allow-list, in precedence order.
const ALLOW_LIST_ORDER: [MediaKind; 4] = [
    MediaKind::Photo,
    MediaKind::Video,
    MediaKind::Animation,
    MediaKind::Document,
];

/// Turns inbound events into [`Resolution`]s.
#[derive(Debug, Clone)]
pub struct MediaResolver {
    extensions: PerKind,
    mime_prefixes: PerKind,
}

impl MediaResolver {
    pub fn new(extensions: &PerKind, mime_prefixes: &PerKind) -> Self {
        let normalize_ext = |list: &[String]| -> Vec<String> {
            list.iter()
                .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
                .filter(|e| !e.is_empty())
                .collect()
        };
        let normalize_mime = |list: &[String]| -> Vec<String> {
            list.iter()
                .map(|m| m.trim().to_ascii_lowercase())
                .filter(|m| !m.is_empty())
                .collect()
        };

        Self {
            extensions: PerKind {
                photo: normalize_ext(&extensions.photo),
                video: normalize_ext(&extensions.video),
                animation: normalize_ext(&extensions.animation),
                document: normalize_ext(&extensions.document),
            },
            mime_prefixes: PerKind {
                photo: normalize_mime(&mime_prefixes.photo),
                video: normalize_mime(&mime_prefixes.video),
                animation: normalize_mime(&mime_prefixes.animation),
                document: normalize_mime(&mime_prefixes.document),
            },
        }
    }

    /// Inspect an event. Malformed attachment metadata yields `NoMedia`.
    pub fn resolve(&self, event: &InboundEvent) -> Resolution {
        let attachments = &event.attachments;

        if let Some(video) = &attachments.video {
            return descriptor(MediaKind::Video, video, "video", "mp4")
                .map_or(Resolution::NoMedia, Resolution::Media);
        }

        if !attachments.photo.is_empty() {
            // Platforms list every resolution of a photo; keep the largest.
            let largest = attachments
                .photo
                .iter()
                .filter(|p| !p.file_identifier.trim().is_empty())
                .max_by_key(|p| p.declared_size.unwrap_or(0));
            return match largest {
                Some(photo) => descriptor(MediaKind::Photo, photo, "photo", "jpg")
                    .map(|mut d| {
                        d.content_hint.get_or_insert_with(|| "image/jpeg".to_string());
                        d
                    })
                    .map_or(Resolution::NoMedia, Resolution::Media),
                None => {
                    debug!(message = %event.message_id, "Photo attachment without usable variants");
                    Resolution::NoMedia
                }
            };
        }

        if let Some(document) = &attachments.document {
            return self.resolve_document(document);
        }

        if let Some(animation) = &attachments.animation {
            let ext = match animation.mime_type.as_deref() {
                Some("video/mp4") => "mp4",
                _ => "gif",
            };
            return descriptor(MediaKind::Animation, animation, "animation", ext)
                .map_or(Resolution::NoMedia, Resolution::Media);
        }

        Resolution::NoMedia
    }

    /// Kind implied by a file name's extension, if it is on the allow-list.
    pub fn kind_for_name(&self, name: &str) -> Option<MediaKind> {
        let ext = Path::new(name).extension()?.to_str()?.to_ascii_lowercase();
        ALLOW_LIST_ORDER
            .into_iter()
            .find(|kind| list_for(&self.extensions, *kind).iter().any(|e| *e == ext))
    }

    fn resolve_document(&self, document: &Attachment) -> Resolution {
        let Some(mut descriptor) = descriptor(MediaKind::Document, document, "file", "") else {
            return Resolution::NoMedia;
        };

        let extension = document
            .declared_name
            .as_deref()
            .and_then(|n| Path::new(n).extension())
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        let mime = document.mime_type.as_deref().map(str::to_ascii_lowercase);

        let by_extension = extension.as_deref().and_then(|ext| {
            ALLOW_LIST_ORDER
                .into_iter()
                .find(|kind| list_for(&self.extensions, *kind).iter().any(|e| e == ext))
        });
        let by_mime = || {
            mime.as_deref().and_then(|m| {
                ALLOW_LIST_ORDER.into_iter().find(|kind| {
                    list_for(&self.mime_prefixes, *kind)
                        .iter()
                        .any(|p| m.starts_with(p.as_str()))
                })
            })
        };

        match by_extension.or_else(by_mime) {
            Some(kind) => {
                descriptor.kind = kind;
                Resolution::Media(descriptor)
            }
            None => {
                let detail = match (&extension, &mime) {
                    (Some(ext), _) => format!("file type .{} is not supported", ext),
                    (None, Some(m)) => format!("content type {} is not supported", m),
                    (None, None) => "file type could not be determined".to_string(),
                };
                Resolution::Unsupported {
                    name: descriptor.suggested_name,
                    reason: detail,
                }
            }
        }
    }
}

fn list_for(lists: &PerKind, kind: MediaKind) -> &[String] {
    match kind {
        MediaKind::Photo => &lists.photo,
        MediaKind::Video => &lists.video,
        MediaKind::Animation => &lists.animation,
        MediaKind::Document => &lists.document,
    }
}

/// Build a descriptor, or `None` when the attachment has no file identifier.
fn descriptor(
    kind: MediaKind,
    attachment: &Attachment,
    fallback_prefix: &str,
    fallback_ext: &str,
) -> Option<MediaDescriptor> {
    let file_identifier = attachment.file_identifier.trim();
    if file_identifier.is_empty() {
        return None;
    }

    let suggested_name = match attachment.declared_name.as_deref() {
        Some(name) if !name.trim().is_empty() => sanitize_file_name(name),
        _ => {
            let id = attachment.unique_id.as_deref().unwrap_or(file_identifier);
            let id: String = id.chars().filter(|c| c.is_ascii_alphanumeric()).take(32).collect();
            if fallback_ext.is_empty() {
                format!("{}_{}", fallback_prefix, id)
            } else {
                format!("{}_{}.{}", fallback_prefix, id, fallback_ext)
            }
        }
    };

    Some(MediaDescriptor {
        kind,
        suggested_name,
        byte_size: attachment.declared_size.unwrap_or(0),
        content_hint: attachment.mime_type.clone(),
        file_identifier: file_identifier.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DownloadConfig;
    use stashbot_gateway_protocol::Attachments;

    fn resolver() -> MediaResolver {
        let config = DownloadConfig::default();
        MediaResolver::new(&config.allowed_extensions, &config.allowed_mime_prefixes)
    }

    fn event(attachments: Attachments) -> InboundEvent {
        InboundEvent::new("chat", "1").with_attachments(attachments)
    }

    fn unwrap_media(resolution: Resolution) -> MediaDescriptor {
        match resolution {
            Resolution::Media(d) => d,
            other => panic!("expected media, got {:?}", other),
        }
    }

    #[test]
    fn no_attachments_is_no_media() {
        assert_eq!(resolver().resolve(&event(Attachments::default())), Resolution::NoMedia);
    }

    #[test]
    fn video_takes_priority_over_photo() {
        let attachments = Attachments {
            video: Some(Attachment::new("vid", Some(2048)).named("clip.mp4")),
            photo: vec![Attachment::new("thumb", Some(10))],
            ..Default::default()
        };

        let media = unwrap_media(resolver().resolve(&event(attachments)));
        assert_eq!(media.kind, MediaKind::Video);
        assert_eq!(media.file_identifier, "vid");
        assert_eq!(media.suggested_name, "clip.mp4");
        assert_eq!(media.byte_size, 2048);
    }

    #[test]
    fn photo_picks_largest_variant() {
        let attachments = Attachments {
            photo: vec![
                Attachment::new("small", Some(100)),
                Attachment::new("large", Some(9000)),
                Attachment::new("medium", Some(1500)),
            ],
            ..Default::default()
        };

        let media = unwrap_media(resolver().resolve(&event(attachments)));
        assert_eq!(media.kind, MediaKind::Photo);
        assert_eq!(media.file_identifier, "large");
        assert_eq!(media.byte_size, 9000);
        assert_eq!(media.content_hint.as_deref(), Some("image/jpeg"));
        assert_eq!(media.suggested_name, "photo_large.jpg");
    }

    #[test]
    fn photo_name_prefers_unique_id() {
        let mut photo = Attachment::new("AgAC-long-id", Some(5));
        photo.unique_id = Some("AQADx".to_string());
        let attachments = Attachments {
            photo: vec![photo],
            ..Default::default()
        };

        let media = unwrap_media(resolver().resolve(&event(attachments)));
        assert_eq!(media.suggested_name, "photo_AQADx.jpg");
    }

    #[test]
    fn document_kind_inferred_from_extension() {
        let attachments = Attachments {
            document: Some(Attachment::new("doc", Some(50)).named("Scan.PNG")),
            ..Default::default()
        };

        let media = unwrap_media(resolver().resolve(&event(attachments)));
        assert_eq!(media.kind, MediaKind::Photo);
        assert_eq!(media.suggested_name, "Scan.PNG");
    }

    #[test]
    fn document_kind_inferred_from_mime_when_extension_missing() {
        let attachments = Attachments {
            document: Some(Attachment::new("doc", Some(50)).with_mime("video/quicktime")),
            ..Default::default()
        };

        let media = unwrap_media(resolver().resolve(&event(attachments)));
        assert_eq!(media.kind, MediaKind::Video);
        assert_eq!(media.suggested_name, "file_doc");
    }

    #[test]
    fn document_outside_allow_list_is_unsupported() {
        let attachments = Attachments {
            document: Some(
                Attachment::new("doc", Some(50))
                    .named("notes.pdf")
                    .with_mime("application/pdf"),
            ),
            ..Default::default()
        };

        match resolver().resolve(&event(attachments)) {
            Resolution::Unsupported { name, reason } => {
                assert_eq!(name, "notes.pdf");
                assert!(reason.contains(".pdf"));
            }
            other => panic!("expected unsupported, got {:?}", other),
        }
    }

    #[test]
    fn document_allow_list_is_configurable() {
        let mut config = DownloadConfig::default();
        config.allowed_extensions.document = vec!["PDF".to_string()];
        let resolver =
            MediaResolver::new(&config.allowed_extensions, &config.allowed_mime_prefixes);

        let attachments = Attachments {
            document: Some(Attachment::new("doc", Some(50)).named("notes.pdf")),
            ..Default::default()
        };
        let media = unwrap_media(resolver.resolve(&event(attachments)));
        assert_eq!(media.kind, MediaKind::Document);
    }

    #[test]
    fn animation_resolves_last() {
        let attachments = Attachments {
            animation: Some(Attachment::new("anim", None).with_mime("video/mp4")),
            ..Default::default()
        };

        let media = unwrap_media(resolver().resolve(&event(attachments)));
        assert_eq!(media.kind, MediaKind::Animation);
        assert_eq!(media.byte_size, 0);
        assert_eq!(media.suggested_name, "animation_anim.mp4");
    }

    #[test]
    fn malformed_metadata_maps_to_no_media() {
        let attachments = Attachments {
            video: Some(Attachment::new("  ", Some(10))),
            ..Default::default()
        };
        assert_eq!(resolver().resolve(&event(attachments)), Resolution::NoMedia);

        let attachments = Attachments {
            photo: vec![Attachment::new("", Some(10)), Attachment::new("", None)],
            ..Default::default()
        };
        assert_eq!(resolver().resolve(&event(attachments)), Resolution::NoMedia);
    }

    #[test]
    fn declared_name_is_sanitized() {
        let attachments = Attachments {
            video: Some(Attachment::new("vid", Some(1)).named("../../evil.mp4")),
            ..Default::default()
        };
        let media = unwrap_media(resolver().resolve(&event(attachments)));
        assert_eq!(media.suggested_name, "evil.mp4");
    }

    #[test]
    fn kind_for_name_uses_extension_lists() {
        let resolver = resolver();
        assert_eq!(resolver.kind_for_name("a/b/cat.JPG"), Some(MediaKind::Photo));
        assert_eq!(resolver.kind_for_name("clip.webm"), Some(MediaKind::Video));
        assert_eq!(resolver.kind_for_name("notes.pdf"), None);
        assert_eq!(resolver.kind_for_name("README"), None);
    }
}
