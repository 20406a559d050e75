//! Public URL to backend object key rewriting
//!
//! ```text
//! /avatars/{user}/{hash}?format=png  -> /{bucket}/avatars/{user}/{hash}.png
//! /banners/{user}/{hash}             -> /{bucket}/banners/{user}/{hash}.webp
//! /songs/{user}/{hash}.mp3           -> /{bucket}/songs/{user}/{hash}.mp3
//! anything else                      -> /{bucket}{path}
//! ```

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;
use url::form_urlencoded;

/// Query parameter selecting the image format; never forwarded
const FORMAT_PARAM: &str = "format";

/// Format used when an image request does not ask for one
pub const DEFAULT_IMAGE_FORMAT: &str = "webp";

/// Bytes escaped when a decoded format value becomes part of a path segment
const FORMAT_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'/')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Kind of media a public path refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceClass {
    Avatar,
    Banner,
    Song,
}

impl ResourceClass {
    pub const ALL: [ResourceClass; 3] = [ResourceClass::Avatar, ResourceClass::Banner, ResourceClass::Song];

    /// Public path prefix, e.g. `/avatars/`
    pub fn prefix(&self) -> &'static str {
        match self {
            ResourceClass::Avatar => "/avatars/",
            ResourceClass::Banner => "/banners/",
            ResourceClass::Song => "/songs/",
        }
    }

    /// Directory inside the bucket
    pub fn dir(&self) -> &'static str {
        match self {
            ResourceClass::Avatar => "avatars",
            ResourceClass::Banner => "banners",
            ResourceClass::Song => "songs",
        }
    }

    fn from_path(path: &str) -> Option<(Self, &str)> {
        Self::ALL
            .into_iter()
            .find_map(|class| path.strip_prefix(class.prefix()).map(|rest| (class, rest)))
    }
}

/// Backend location of a media object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectKey {
    pub class: ResourceClass,
    pub user_id: String,
    pub hash: String,
    /// Image format for avatars/banners, file extension (without the dot) for songs
    pub format: String,
}

impl ObjectKey {
    /// Object file name inside the user's directory
    pub fn file_name(&self) -> String {
        if self.format.is_empty() {
            self.hash.clone()
        } else {
            format!("{}.{}", self.hash, self.format)
        }
    }

    /// Absolute backend path including the bucket
    pub fn backend_path(&self, bucket: &str) -> String {
        format!("/{}/{}/{}/{}", bucket, self.class.dir(), self.user_id, self.file_name())
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.class.dir(), self.user_id, self.file_name())
    }
}

/// Result of rewriting one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rewrite {
    /// Backend path, always starting with `/{bucket}`
    pub path: String,
    /// Forwarded query string without the leading `?`
    pub query: Option<String>,
    /// Set when the path named a media object
    pub object: Option<ObjectKey>,
}

impl Rewrite {
    /// Path plus query in request-target form
    pub fn path_and_query(&self) -> String {
        match &self.query {
            Some(q) => format!("{}?{}", self.path, q),
            None => self.path.clone(),
        }
    }
}

/// Split `{user}/{name}` on the first `/`; both parts must be non-empty
pub fn split_object_name(rest: &str) -> Option<(&str, &str)> {
    let (user_id, name) = rest.split_once('/')?;
    if user_id.is_empty() || name.is_empty() {
        return None;
    }
    Some((user_id, name))
}

/// Split `name` into `(stem, extension)` at the last `.` of its final path
/// element. The extension excludes the dot and is empty when there is none.
pub fn split_extension(name: &str) -> (&str, &str) {
    let element_start = name.rfind('/').map(|i| i + 1).unwrap_or(0);
    match name[element_start..].rfind('.') {
        Some(dot) => {
            let dot = element_start + dot;
            (&name[..dot], &name[dot + 1..])
        }
        None => (name, ""),
    }
}

/// Rewrites public media URLs into backend object paths
#[derive(Debug, Clone)]
pub struct Router {
    bucket: String,
}

impl Router {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self { bucket: bucket.into() }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Rewrite a request path and query for the backend
    pub fn rewrite(&self, path: &str, query: Option<&str>) -> Rewrite {
        let query = query.filter(|q| !q.is_empty());

        if let Some((class, rest)) = ResourceClass::from_path(path) {
            if let Some((user_id, name)) = split_object_name(rest) {
                let (object, query) = match class {
                    ResourceClass::Avatar | ResourceClass::Banner => {
                        let (format, query) = take_format(query);
                        let object = ObjectKey {
                            class,
                            user_id: user_id.to_string(),
                            hash: name.to_string(),
                            format,
                        };
                        (object, query)
                    }
                    ResourceClass::Song => {
                        let (hash, ext) = split_extension(name);
                        let object = ObjectKey {
                            class,
                            user_id: user_id.to_string(),
                            hash: hash.to_string(),
                            format: ext.to_string(),
                        };
                        (object, query.map(str::to_string))
                    }
                };

                return Rewrite {
                    path: object.backend_path(&self.bucket),
                    query,
                    object: Some(object),
                };
            }
        }

        self.passthrough(path, query)
    }

    /// Prefix the bucket onto an unrecognised path
    fn passthrough(&self, path: &str, query: Option<&str>) -> Rewrite {
        let path = if path.starts_with('/') {
            format!("/{}{}", self.bucket, path)
        } else {
            format!("/{}/{}", self.bucket, path)
        };
        Rewrite {
            path,
            query: query.map(str::to_string),
            object: None,
        }
    }
}

/// Pull `format` out of the query, returning the chosen format (escaped for
/// use in a path) and the remaining query (if any parameters are left).
fn take_format(query: Option<&str>) -> (String, Option<String>) {
    let Some(query) = query else {
        return (DEFAULT_IMAGE_FORMAT.to_string(), None);
    };

    let mut format = None;
    let mut remaining = form_urlencoded::Serializer::new(String::new());
    let mut kept = 0usize;

    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        if key == FORMAT_PARAM {
            if format.is_none() {
                format = Some(value.into_owned());
            }
        } else {
            remaining.append_pair(&key, &value);
            kept += 1;
        }
    }

    let format = format
        .filter(|f| !f.is_empty())
        .map(|f| utf8_percent_encode(&f, FORMAT_ENCODE_SET).to_string())
        .unwrap_or_else(|| DEFAULT_IMAGE_FORMAT.to_string());
    let remaining = (kept > 0).then(|| remaining.finish());

    (format, remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> Router {
        Router::new("media")
    }

    #[test]
    fn test_avatar_defaults_to_webp() {
        let rewrite = router().rewrite("/avatars/42/abcdef", None);

        assert_eq!(rewrite.path, "/media/avatars/42/abcdef.webp");
        assert_eq!(rewrite.query, None);
        assert_eq!(
            rewrite.object,
            Some(ObjectKey {
                class: ResourceClass::Avatar,
                user_id: "42".to_string(),
                hash: "abcdef".to_string(),
                format: "webp".to_string(),
            })
        );
    }

    #[test]
    fn test_avatar_explicit_format_is_stripped_from_query() {
        let rewrite = router().rewrite("/avatars/42/abcdef", Some("format=png"));

        assert_eq!(rewrite.path, "/media/avatars/42/abcdef.png");
        assert_eq!(rewrite.query, None);
        assert_eq!(rewrite.path_and_query(), "/media/avatars/42/abcdef.png");
    }

    #[test]
    fn test_banner_keeps_other_query_parameters() {
        let rewrite = router().rewrite("/banners/7/ff00", Some("v=3&format=jpg&format=png&t=a+b"));

        assert_eq!(rewrite.path, "/media/banners/7/ff00.jpg");
        assert_eq!(rewrite.query.as_deref(), Some("v=3&t=a+b"));
        assert!(!rewrite.path_and_query().contains("format"));
    }

    #[test]
    fn test_empty_format_uses_default() {
        let rewrite = router().rewrite("/banners/7/ff00", Some("format="));
        assert_eq!(rewrite.path, "/media/banners/7/ff00.webp");
        assert_eq!(rewrite.query, None);
    }

    #[test]
    fn test_format_cannot_change_request_target() {
        let rewrite = router().rewrite("/avatars/42/abc", Some("format=png%3Facl"));
        assert_eq!(rewrite.path, "/media/avatars/42/abc.png%3Facl");
        assert_eq!(rewrite.query, None);
        assert_eq!(rewrite.path_and_query(), "/media/avatars/42/abc.png%3Facl");

        let rewrite = router().rewrite("/banners/42/abc", Some("format=png%23frag"));
        assert_eq!(rewrite.path, "/media/banners/42/abc.png%23frag");

        let rewrite = router().rewrite("/avatars/42/abc", Some("format=..%2F..%2Fsecret"));
        assert_eq!(rewrite.path, "/media/avatars/42/abc...%2F..%2Fsecret");
    }

    #[test]
    fn test_format_with_spaces_is_escaped() {
        let rewrite = router().rewrite("/avatars/42/abc", Some("format=a%20b"));
        assert_eq!(rewrite.path, "/media/avatars/42/abc.a%20b");

        let rewrite = router().rewrite("/avatars/42/abc", Some("format=a+b&v=1"));
        assert_eq!(rewrite.path, "/media/avatars/42/abc.a%20b");
        assert_eq!(rewrite.query.as_deref(), Some("v=1"));
    }

    #[test]
    fn test_song_keeps_extension() {
        let rewrite = router().rewrite("/songs/42/abcdef.mp3", None);

        assert_eq!(rewrite.path, "/media/songs/42/abcdef.mp3");
        let object = rewrite.object.unwrap();
        assert_eq!(object.hash, "abcdef");
        assert_eq!(object.format, "mp3");
    }

    #[test]
    fn test_song_ignores_format_query() {
        let rewrite = router().rewrite("/songs/42/abcdef.flac", Some("format=mp3"));

        assert_eq!(rewrite.path, "/media/songs/42/abcdef.flac");
        assert_eq!(rewrite.query.as_deref(), Some("format=mp3"));
    }

    #[test]
    fn test_song_without_extension() {
        let rewrite = router().rewrite("/songs/42/abcdef", None);
        assert_eq!(rewrite.path, "/media/songs/42/abcdef");
        assert_eq!(rewrite.object.unwrap().format, "");
    }

    #[test]
    fn test_malformed_paths_fall_through() {
        for path in ["/avatars/42", "/avatars/42/", "/avatars//abcdef", "/songs/", "/banners/"] {
            let rewrite = router().rewrite(path, None);
            assert_eq!(rewrite.object, None, "{path} should not match");
            assert_eq!(rewrite.path, format!("/media{}", path));
        }
    }

    #[test]
    fn test_passthrough_keeps_query() {
        let rewrite = router().rewrite("/other/file.txt", Some("format=png&x=1"));

        assert_eq!(rewrite.path, "/media/other/file.txt");
        assert_eq!(rewrite.query.as_deref(), Some("format=png&x=1"));
        assert_eq!(rewrite.object, None);
    }

    #[test]
    fn test_prefix_requires_trailing_slash() {
        let rewrite = router().rewrite("/avatarsx/42/abcdef", None);
        assert_eq!(rewrite.object, None);
        assert_eq!(rewrite.path, "/media/avatarsx/42/abcdef");
    }

    #[test]
    fn test_split_object_name() {
        assert_eq!(split_object_name("42/abc.mp3"), Some(("42", "abc.mp3")));
        assert_eq!(split_object_name("42/a/b"), Some(("42", "a/b")));
        assert_eq!(split_object_name("42"), None);
        assert_eq!(split_object_name("/abc"), None);
        assert_eq!(split_object_name("42/"), None);
    }

    #[test]
    fn test_split_extension() {
        assert_eq!(split_extension("abcdef.mp3"), ("abcdef", "mp3"));
        assert_eq!(split_extension("a.b.ogg"), ("a.b", "ogg"));
        assert_eq!(split_extension("abcdef"), ("abcdef", ""));
        assert_eq!(split_extension("dir.x/abcdef"), ("dir.x/abcdef", ""));
    }
}
