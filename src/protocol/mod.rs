pub mod deserialise;
pub mod serialise;
pub mod wire_types;

pub use self::deserialise::{ConsumableBuffer, ProtocolError};
pub use self::serialise::WritableBuffer;

use self::wire_types::*;

impl Message {
    /// A response skeleton for this query: the ID, opcode, and RD flag
    /// are copied, the questions are echoed, and the answer section is
    /// empty.  The RCODE is `NoError` for a standard query and
    /// `NotImplemented` for anything else.
    pub fn make_response(&self) -> Self {
        Self {
            header: Header {
                id: self.header.id,
                is_response: true,
                opcode: self.header.opcode,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: self.header.recursion_desired,
                recursion_available: false,
                z: 0,
                rcode: if self.header.opcode == Opcode::Standard {
                    Rcode::NoError
                } else {
                    Rcode::NotImplemented
                },
                qdcount: saturating_count(self.questions.len()),
                ancount: 0,
                nscount: 0,
                arcount: 0,
            },
            questions: self.questions.clone(),
            answers: Vec::new(),
        }
    }

    pub fn make_format_error_response(id: u16) -> Self {
        Self {
            header: Header {
                id,
                is_response: true,
                opcode: Opcode::Standard,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: false,
                recursion_available: false,
                z: 0,
                rcode: Rcode::FormatError,
                qdcount: 0,
                ancount: 0,
                nscount: 0,
                arcount: 0,
            },
            questions: Vec::new(),
            answers: Vec::new(),
        }
    }

    pub fn from_question(id: u16, question: Question) -> Self {
        Self {
            header: Header {
                id,
                is_response: false,
                opcode: Opcode::Standard,
                is_authoritative: false,
                is_truncated: false,
                recursion_desired: false,
                recursion_available: false,
                z: 0,
                rcode: Rcode::NoError,
                qdcount: 1,
                ancount: 0,
                nscount: 0,
                arcount: 0,
            },
            questions: vec![question],
            answers: Vec::new(),
        }
    }

    /// Append answers, keeping `ancount` in step.
    pub fn push_answers(&mut self, mut answers: Vec<ResourceRecord>) {
        self.answers.append(&mut answers);
        self.header.ancount = saturating_count(self.answers.len());
    }
}

/// Section sizes beyond `u16::MAX` are clamped here, and then
/// rejected by serialisation as a count mismatch.
fn saturating_count(len: usize) -> u16 {
    u16::try_from(len).unwrap_or(u16::MAX)
}

impl DomainName {
    /// The labels joined with `.`, or `.` for the root.  A `.` or `\`
    /// inside a label is written with a `\` before it, so the result
    /// parses back to the same name.
    pub fn to_dotted_string(&self) -> String {
        if self.is_root() {
            return ".".to_string();
        }

        let mut out = String::with_capacity(self.encoded_len());
        for (i, label) in self.labels.iter().enumerate() {
            if i > 0 {
                out.push('.');
            }
            for octet in label {
                if *octet == b'.' || *octet == b'\\' {
                    out.push('\\');
                }
                out.push(*octet as char);
            }
        }

        out
    }

    /// Parse a dotted name, with or without a trailing `.`.  The empty
    /// string and `.` are both the root.  `\` makes the next character
    /// part of the label, so `\.` is a `.` inside a label.
    pub fn from_dotted_string(s: &str) -> Option<Self> {
        if s.is_empty() || s == "." {
            return Some(Self::root_domain());
        }

        let mut labels = Vec::new();
        let mut label = Vec::new();
        let mut octets = s.bytes();
        while let Some(octet) = octets.next() {
            match octet {
                b'\\' => label.push(octets.next()?),
                b'.' => labels.push(std::mem::take(&mut label)),
                _ => label.push(octet),
            }
        }
        // empty only after a trailing `.`
        if !label.is_empty() {
            labels.push(label);
        }

        Self::from_labels(labels)
    }

    /// Build a name from its labels (without the null label), checking
    /// every label is 1 to 63 ASCII octets and the whole name fits in
    /// 255 octets.
    pub fn from_labels(labels: Vec<Vec<u8>>) -> Option<Self> {
        let mut len = 1;

        for label in &labels {
            if label.is_empty() || label.len() > MAX_LABEL_LEN || !label.is_ascii() {
                return None;
            }
            len += label.len() + 1;
        }

        if len <= MAX_NAME_LEN {
            Some(Self { labels })
        } else {
            None
        }
    }
}
