//! WebDAV `PROPFIND` multistatus parsing

use crate::error::{Error, Result};
use crate::types::RemoteObjectRef;
use quick_xml::Reader;
use quick_xml::events::Event;

/// Request body asking only for the properties we use
pub(crate) const PROPFIND_BODY: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:getcontentlength/>
    <d:resourcetype/>
  </d:prop>
</d:propfind>"#;

#[derive(Default)]
struct Entry {
    href: Option<String>,
    size: Option<u64>,
    collection: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Field {
    None,
    Href,
    ContentLength,
}

/// Parse a `207 Multi-Status` body into the files it lists
///
/// Collections (including the listed directory itself) are skipped. Names are
/// the percent-decoded last path segment of each `href`; entries without a
/// content length are reported with size 0.
pub fn parse_multistatus(xml: &str) -> Result<Vec<RemoteObjectRef>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut objects = Vec::new();
    let mut current: Option<Entry> = None;
    let mut field = Field::None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| Error::Source(format!("invalid PROPFIND response: {e}")))?;

        match event {
            Event::Start(e) => match e.local_name().as_ref() {
                b"response" => current = Some(Entry::default()),
                b"href" => field = Field::Href,
                b"getcontentlength" => field = Field::ContentLength,
                b"collection" => mark_collection(&mut current),
                _ => {}
            },
            Event::Empty(e) => {
                if e.local_name().as_ref() == b"collection" {
                    mark_collection(&mut current);
                }
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| Error::Source(format!("invalid PROPFIND text: {e}")))?;
                if let Some(entry) = current.as_mut() {
                    match field {
                        Field::Href => entry.href = Some(text.trim().to_string()),
                        Field::ContentLength => {
                            // Servers report 0 or omit the value for empty files
                            entry.size = text.trim().parse().ok();
                        }
                        Field::None => {}
                    }
                }
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"response" => {
                    if let Some(entry) = current.take() {
                        if let Some(object) = into_object(entry)? {
                            objects.push(object);
                        }
                    }
                }
                b"href" | b"getcontentlength" => field = Field::None,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(objects)
}

fn mark_collection(current: &mut Option<Entry>) {
    if let Some(entry) = current.as_mut() {
        entry.collection = true;
    }
}

fn into_object(entry: Entry) -> Result<Option<RemoteObjectRef>> {
    if entry.collection {
        return Ok(None);
    }
    let Some(href) = entry.href else {
        return Err(Error::Source("PROPFIND response entry without href".into()));
    };
    let Some(raw_name) = href.trim_end_matches('/').rsplit('/').next() else {
        return Ok(None);
    };
    if raw_name.is_empty() {
        return Ok(None);
    }
    let name = urlencoding::decode(raw_name)
        .map_err(|e| Error::Source(format!("href {href} is not valid UTF-8: {e}")))?
        .into_owned();
    Ok(Some(RemoteObjectRef::new(name, entry.size.unwrap_or(0))))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const NEXTCLOUD_LISTING: &str = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:s="http://sabredav.org/ns" xmlns:oc="http://owncloud.org/ns">
  <d:response>
    <d:href>/remote.php/webdav/run/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
    <d:propstat>
      <d:prop><d:getcontentlength/></d:prop>
      <d:status>HTTP/1.1 404 Not Found</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/webdav/run/a.fq.gz</d:href>
    <d:propstat>
      <d:prop>
        <d:getcontentlength>1048576</d:getcontentlength>
        <d:resourcetype/>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/webdav/run/a.fq.gz.md5</d:href>
    <d:propstat>
      <d:prop>
        <d:getcontentlength>43</d:getcontentlength>
        <d:resourcetype/>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/webdav/run/sample%20one__1.fq.gz</d:href>
    <d:propstat>
      <d:prop>
        <d:getcontentlength>12</d:getcontentlength>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
  <d:response>
    <d:href>/remote.php/webdav/run/nested/</d:href>
    <d:propstat>
      <d:prop>
        <d:resourcetype><d:collection/></d:resourcetype>
      </d:prop>
      <d:status>HTTP/1.1 200 OK</d:status>
    </d:propstat>
  </d:response>
</d:multistatus>"#;

    #[test]
    fn lists_files_and_skips_collections() {
        let objects = parse_multistatus(NEXTCLOUD_LISTING).unwrap();
        assert_eq!(
            objects,
            vec![
                RemoteObjectRef::new("a.fq.gz", 1_048_576),
                RemoteObjectRef::new("a.fq.gz.md5", 43),
                RemoteObjectRef::new("sample one__1.fq.gz", 12),
            ]
        );
    }

    #[test]
    fn missing_content_length_is_zero() {
        let xml = r#"<multistatus xmlns="DAV:">
            <response><href>/dav/empty.fq.gz</href><propstat><prop/></propstat></response>
        </multistatus>"#;
        let objects = parse_multistatus(xml).unwrap();
        assert_eq!(objects, vec![RemoteObjectRef::new("empty.fq.gz", 0)]);
    }

    #[test]
    fn empty_multistatus_lists_nothing() {
        let xml = r#"<?xml version="1.0"?><d:multistatus xmlns:d="DAV:"></d:multistatus>"#;
        assert!(parse_multistatus(xml).unwrap().is_empty());
    }

    #[test]
    fn malformed_xml_is_a_source_error() {
        let err = parse_multistatus("<d:multistatus><d:response></d:multistatus>").unwrap_err();
        assert!(matches!(err, Error::Source(_)), "got {err:?}");
    }

    #[test]
    fn response_without_href_is_rejected() {
        let xml = r#"<d:multistatus xmlns:d="DAV:"><d:response><d:propstat/></d:response></d:multistatus>"#;
        assert!(parse_multistatus(xml).is_err());
    }
}
