use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashMap;

/// Collects the unescaped text of every leaf element, keyed by local name.
/// The first occurrence of a name wins.
pub(crate) fn leaf_fields(xml: &str) -> Result<HashMap<String, String>, quick_xml::Error> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut fields = HashMap::new();
    let mut current: Option<String> = None;

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                current = Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Event::Text(t) => {
                if let Some(name) = current.as_ref() {
                    let text = t.unescape()?;
                    fields
                        .entry(name.clone())
                        .or_insert_with(|| text.into_owned());
                }
            }
            Event::CData(c) => {
                if let Some(name) = current.as_ref() {
                    let text = String::from_utf8_lossy(&c.into_inner()).into_owned();
                    fields.entry(name.clone()).or_insert(text);
                }
            }
            Event::End(_) => current = None,
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(fields)
}
