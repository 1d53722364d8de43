use std::collections::HashMap;
use std::io::BufRead;

use anyhow::Result;
use quick_xml::events::{BytesEnd, BytesStart, Event as XmlEvent};
use quick_xml::Reader;

use crate::error::ScanError;
use crate::pipeline::Event;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Attributes(HashMap<String, String>);

impl Attributes {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Looks up an attribute the caller cannot do without.
    pub fn require(&self, element: &str, key: &'static str) -> Result<&str, ScanError> {
        self.get(key).ok_or_else(|| ScanError::MissingAttribute {
            element: element.to_owned(),
            attribute: key,
        })
    }
}

impl<K: Into<String>, V: Into<String>> std::iter::FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Attributes(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Element {
    Start { name: String, attributes: Attributes },
    End { name: String },
}

/// Streams the start and end tags of an xml document, top-down, without
/// building a tree.
pub struct ElementParser<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    open: Vec<String>,
    // end tag owed for a self-closing element
    pending_end: Option<String>,
    seen_root: bool,
    stopped: bool,
}

impl<R: BufRead> ElementParser<R> {
    pub fn new(input: R) -> Self {
        let mut reader = Reader::from_reader(input);
        reader.check_end_names(true);
        Self {
            reader,
            buf: Vec::new(),
            open: Vec::new(),
            pending_end: None,
            seen_root: false,
            stopped: false,
        }
    }

    fn malformed(&mut self, message: impl ToString) -> Event<Element> {
        self.stopped = true;
        let position = self.reader.buffer_position();
        (
            position,
            Err(ScanError::MalformedXml {
                position,
                message: message.to_string(),
            }
            .into()),
        )
    }

    fn start(&self, tag: &BytesStart<'_>) -> Result<(String, Attributes), ScanError> {
        let name = self
            .reader
            .decoder()
            .decode(tag.name().as_ref())
            .map_err(|e| self.xml_error(e))?
            .into_owned();
        let attributes = tag
            .attributes()
            .map(|attr| {
                let attr = attr.map_err(|e| self.xml_error(e))?;
                let key = self
                    .reader
                    .decoder()
                    .decode(attr.key.as_ref())
                    .map_err(|e| self.xml_error(e))?
                    .into_owned();
                let value = attr
                    .unescape_value()
                    .map_err(|e| self.xml_error(e))?
                    .into_owned();
                Ok((key, value))
            })
            .collect::<Result<Attributes, ScanError>>()?;
        Ok((name, attributes))
    }

    fn end(&self, tag: &BytesEnd<'_>) -> Result<String, ScanError> {
        Ok(self
            .reader
            .decoder()
            .decode(tag.name().as_ref())
            .map_err(|e| self.xml_error(e))?
            .into_owned())
    }

    fn xml_error(&self, err: impl ToString) -> ScanError {
        ScanError::MalformedXml {
            position: self.reader.buffer_position(),
            message: err.to_string(),
        }
    }
}

impl<R: BufRead> Iterator for ElementParser<R> {
    type Item = Event<Element>;
    fn next(&mut self) -> Option<Self::Item> {
        if self.stopped {
            return None;
        }
        if let Some(name) = self.pending_end.take() {
            return Some((self.reader.buffer_position(), Ok(Element::End { name })));
        }

        let out = loop {
            self.buf.clear();
            let event = self
                .reader
                .read_event_into(&mut self.buf)
                .map(|event| event.into_owned());
            let event = match event {
                Ok(event) => event,
                Err(e) => break self.malformed(e),
            };
            let position = self.reader.buffer_position();
            match event {
                XmlEvent::Start(tag) => {
                    if self.open.is_empty() && self.seen_root {
                        break self.malformed("junk after document element");
                    }
                    self.seen_root = true;
                    match self.start(&tag) {
                        Ok((name, attributes)) => {
                            self.open.push(name.clone());
                            break (position, Ok(Element::Start { name, attributes }));
                        }
                        Err(e) => {
                            self.stopped = true;
                            break (position, Err(e.into()));
                        }
                    }
                }
                XmlEvent::Empty(tag) => {
                    if self.open.is_empty() && self.seen_root {
                        break self.malformed("junk after document element");
                    }
                    self.seen_root = true;
                    match self.start(&tag) {
                        Ok((name, attributes)) => {
                            self.pending_end = Some(name.clone());
                            break (position, Ok(Element::Start { name, attributes }));
                        }
                        Err(e) => {
                            self.stopped = true;
                            break (position, Err(e.into()));
                        }
                    }
                }
                XmlEvent::End(tag) => match self.end(&tag) {
                    Ok(name) => {
                        self.open.pop();
                        break (position, Ok(Element::End { name }));
                    }
                    Err(e) => {
                        self.stopped = true;
                        break (position, Err(e.into()));
                    }
                },
                XmlEvent::Eof => {
                    if let Some(name) = self.open.last() {
                        let message = format!("unclosed element <{}>", name);
                        break self.malformed(message);
                    }
                    if !self.seen_root {
                        break self.malformed("no element found");
                    }
                    self.stopped = true;
                    return None;
                }
                XmlEvent::Text(text) => {
                    let text = match text.unescape() {
                        Ok(text) => text,
                        Err(e) => break self.malformed(e),
                    };
                    if self.open.is_empty() && !text.trim().is_empty() {
                        break self.malformed("junk outside document element");
                    }
                }
                // comments, declarations and processing instructions
                _ => {}
            }
        };
        Some(out)
    }
}

#[cfg(test)]
mod test {
    use super::{Element, ElementParser};
    use crate::error::ScanError;

    fn elements(xml: &[u8]) -> Vec<anyhow::Result<Element>> {
        ElementParser::new(xml).map(|(_, res)| res).collect()
    }

    fn start(name: &str, attributes: &[(&str, &str)]) -> Element {
        Element::Start {
            name: name.into(),
            attributes: attributes.iter().copied().collect(),
        }
    }

    fn end(name: &str) -> Element {
        Element::End { name: name.into() }
    }

    fn is_malformed(res: &anyhow::Result<Element>) -> bool {
        match res {
            Err(e) => matches!(
                e.downcast_ref::<ScanError>(),
                Some(ScanError::MalformedXml { .. })
            ),
            Ok(_) => false,
        }
    }

    #[test]
    fn yields_start_and_end_in_document_order() {
        let xml = br#"<?xml version="1.0"?>
<pdml>
  <packet>
    <proto name="usb">
      <field name="usb.endpoint_number" show="0x81"/>
    </proto>
  </packet>
</pdml>"#;
        let events = elements(xml)
            .into_iter()
            .collect::<anyhow::Result<Vec<_>>>()
            .unwrap();
        assert_eq!(
            events,
            vec![
                start("pdml", &[]),
                start("packet", &[]),
                start("proto", &[("name", "usb")]),
                start(
                    "field",
                    &[("name", "usb.endpoint_number"), ("show", "0x81")]
                ),
                end("field"),
                end("proto"),
                end("packet"),
                end("pdml"),
            ]
        );
    }

    #[test]
    fn unescapes_attribute_values() {
        let events = elements(br#"<field show="a &amp; b &lt;c&gt;"/>"#);
        match &events[0] {
            Ok(Element::Start { attributes, .. }) => {
                assert_eq!(attributes.get("show"), Some("a & b <c>"))
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn mismatched_end_tag_is_malformed() {
        let events = elements(b"<pdml><packet></pdml>");
        assert!(is_malformed(events.last().unwrap()));
    }

    #[test]
    fn unclosed_element_is_malformed() {
        let events = elements(b"<pdml><packet>");
        assert_eq!(events.len(), 3);
        assert!(is_malformed(&events[2]));
    }

    #[test]
    fn empty_document_is_malformed() {
        let events = elements(b"");
        assert_eq!(events.len(), 1);
        assert!(is_malformed(&events[0]));
    }

    #[test]
    fn second_root_is_malformed() {
        let events = elements(b"<a/><b/>");
        assert_eq!(events.len(), 3);
        assert!(is_malformed(&events[2]));
    }

    #[test]
    fn bare_ampersand_in_text_is_malformed() {
        let events = elements(b"<pdml><packet>a & b</packet></pdml>");
        assert!(is_malformed(events.last().unwrap()));
    }

    #[test]
    fn undefined_entity_in_text_is_malformed() {
        let events = elements(b"<pdml><packet>&bogus;</packet></pdml>");
        assert!(is_malformed(events.last().unwrap()));
    }

    #[test]
    fn text_outside_root_is_malformed() {
        let events = elements(b"junk<pdml/>");
        assert_eq!(events.len(), 1);
        assert!(is_malformed(&events[0]));

        let events = elements(b"<pdml/>trailing");
        assert_eq!(events.len(), 3);
        assert!(is_malformed(&events[2]));
    }

    #[test]
    fn escaped_text_is_accepted() {
        let events = elements(b"<?xml version=\"1.0\"?>\n<pdml>\n  a &amp; b &#x41;\n</pdml>\n");
        assert!(events.iter().all(Result::is_ok));
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn stops_after_first_error() {
        let mut parser = ElementParser::new(&b"<a></b><c/>"[..]);
        assert!(parser.next().unwrap().1.is_ok());
        assert!(parser.next().unwrap().1.is_err());
        assert!(parser.next().is_none());
    }

    #[test]
    fn missing_required_attribute() {
        let attributes: super::Attributes = vec![("name", "usb.iso.data")].into_iter().collect();
        assert_eq!(attributes.require("field", "name").ok(), Some("usb.iso.data"));
        assert!(matches!(
            attributes.require("field", "show"),
            Err(ScanError::MissingAttribute {
                attribute: "show",
                ..
            })
        ));
    }
}
