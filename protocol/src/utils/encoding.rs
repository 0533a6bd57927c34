use encoding::{DecoderTrap, EncoderTrap, EncodingRef};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Text codec of a child process' console streams.
#[allow(clippy::upper_case_acronyms)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum Encoding {
    ASCII,
    #[default]
    UTF8,
    UTF16LE,
    UTF16BE,
    GBK,
    GB18030,
    HZ,
    BIG5_2003,
}

const ALL: [Encoding; 8] = [
    Encoding::ASCII,
    Encoding::UTF8,
    Encoding::UTF16LE,
    Encoding::UTF16BE,
    Encoding::GBK,
    Encoding::GB18030,
    Encoding::HZ,
    Encoding::BIG5_2003,
];

impl Encoding {
    fn codec(&self) -> EncodingRef {
        match self {
            Encoding::ASCII => encoding::all::ASCII,
            Encoding::UTF8 => encoding::all::UTF_8,
            Encoding::UTF16LE => encoding::all::UTF_16LE,
            Encoding::UTF16BE => encoding::all::UTF_16BE,
            Encoding::GBK => encoding::all::GBK,
            Encoding::GB18030 => encoding::all::GB18030,
            Encoding::HZ => encoding::all::HZ,
            Encoding::BIG5_2003 => encoding::all::BIG5_2003,
        }
    }

    pub fn name(&self) -> &'static str {
        self.codec().name()
    }

    pub fn from_name(name: &str) -> Option<Encoding> {
        let name = name.trim().to_ascii_lowercase();
        ALL.into_iter().find(|e| e.name() == name)
    }

    /// Lossy: undecodable bytes become U+FFFD.
    pub fn decode(&self, bytes: &[u8]) -> String {
        if *self == Encoding::UTF8 {
            return String::from_utf8_lossy(bytes).into_owned();
        }
        self.codec()
            .decode(bytes, DecoderTrap::Replace)
            .unwrap_or_else(|_| String::from_utf8_lossy(bytes).into_owned())
    }

    /// Unencodable characters become `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        if *self == Encoding::UTF8 {
            return text.as_bytes().to_vec();
        }
        self.codec()
            .encode(text, EncoderTrap::Replace)
            .unwrap_or_else(|_| text.as_bytes().to_vec())
    }
}

impl Serialize for Encoding {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Encoding {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Encoding::from_name(&name)
            .ok_or_else(|| serde::de::Error::custom(format!("Unknown encoding: {}", name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_resolve_back() {
        for encoding in ALL {
            assert_eq!(Encoding::from_name(encoding.name()), Some(encoding));
        }
        assert_eq!(Encoding::from_name(" UTF-8 "), Some(Encoding::UTF8));
        assert_eq!(Encoding::from_name("latin-9"), None);
    }

    #[test]
    fn gbk_console_line_decodes() {
        // "你好" in GBK
        let bytes = [0xC4, 0xE3, 0xBA, 0xC3];
        assert_eq!(Encoding::GBK.decode(&bytes), "你好");
        assert_eq!(Encoding::GBK.encode("你好"), bytes.to_vec());
    }

    #[test]
    fn invalid_utf8_is_replaced() {
        assert_eq!(Encoding::UTF8.decode(b"ok \xff"), "ok \u{fffd}");
    }

    #[test]
    fn unknown_encoding_is_rejected() {
        assert!(serde_json::from_str::<Encoding>("\"ebcdic\"").is_err());
        assert_eq!(
            serde_json::from_str::<Encoding>("\"gb18030\"").unwrap(),
            Encoding::GB18030
        );
    }
}
