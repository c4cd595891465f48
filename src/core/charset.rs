// Charset handling for the wire: encodes requests, decodes responses, measures lengths.
use crate::core::error::{Error, ErrorKind};
use encoding_rs::{Encoding, UTF_8};
use std::borrow::Cow;
use std::fmt;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Charset(&'static Encoding);

impl Charset {
    pub fn utf8() -> Self {
        Self(UTF_8)
    }

    /// Resolves a WHATWG encoding label such as `utf-8` or `windows-1251`.
    pub fn from_label(label: &str) -> Result<Self, Error> {
        let encoding = Encoding::for_label(label.trim().as_bytes()).ok_or_else(|| {
            Error::new(ErrorKind::Usage).with_message(format!("unknown charset \"{label}\""))
        })?;
        if encoding.output_encoding() != encoding {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("charset \"{label}\" cannot encode requests")));
        }
        Ok(Self(encoding))
    }

    pub fn name(self) -> &'static str {
        self.0.name()
    }

    pub fn encode(self, text: &str) -> Result<Vec<u8>, Error> {
        let (bytes, _, unmappable) = self.0.encode(text);
        if unmappable {
            return Err(Error::new(ErrorKind::Encoding).with_message(format!(
                "request contains characters not representable in {}",
                self.name()
            )));
        }
        Ok(bytes.into_owned())
    }

    /// Malformed sequences decode to U+FFFD; no BOM sniffing.
    pub fn decode(self, bytes: &[u8]) -> Cow<'_, str> {
        self.0.decode_without_bom_handling(bytes).0
    }

    /// Length in characters, the unit the broker's responses are checked in.
    pub fn char_len(text: &str) -> usize {
        text.chars().count()
    }
}

impl Default for Charset {
    fn default() -> Self {
        Self::utf8()
    }
}

impl fmt::Display for Charset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::Charset;
    use crate::core::error::ErrorKind;

    #[test]
    fn labels_resolve_case_insensitively() {
        let charset = Charset::from_label(" UTF8 ").expect("utf8");
        assert_eq!(charset, Charset::utf8());
        assert_eq!(
            Charset::from_label("cp1251").expect("cp1251").name(),
            "windows-1251"
        );
    }

    #[test]
    fn unknown_and_decode_only_labels_are_rejected() {
        let err = Charset::from_label("klingon").expect_err("unknown");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = Charset::from_label("utf-16le").expect_err("decode only");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn encoded_length_depends_on_charset() {
        let text = "привет";
        assert_eq!(Charset::utf8().encode(text).expect("utf8").len(), 12);
        let cp1251 = Charset::from_label("windows-1251").expect("cp1251");
        assert_eq!(cp1251.encode(text).expect("cp1251").len(), 6);
        assert_eq!(Charset::char_len(text), 6);
    }

    #[test]
    fn unmappable_characters_fail() {
        let latin = Charset::from_label("iso-8859-1").expect("latin1");
        let err = latin.encode("日本").expect_err("unmappable");
        assert_eq!(err.kind(), ErrorKind::Encoding);
    }

    #[test]
    fn decode_round_trips_single_byte_charset() {
        let cp1251 = Charset::from_label("windows-1251").expect("cp1251");
        let bytes = cp1251.encode("мир").expect("encode");
        assert_eq!(cp1251.decode(&bytes), "мир");
    }
}
