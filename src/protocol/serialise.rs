//! Serialisation of DNS messages to the wire format.  See the
//! `wire_types` module for details of the format.

use bytes::{BufMut, BytesMut};
use std::fmt;

use crate::protocol::wire_types::*;

impl Message {
    /// # Errors
    ///
    /// If the header counts do not match the sections, or a record is
    /// too big.
    pub fn to_octets(&self) -> Result<BytesMut, Error> {
        let mut buffer = WritableBuffer::default();
        self.serialise(&mut buffer)?;
        Ok(buffer.octets)
    }

    /// The counts in the header are written as they are, so they must
    /// already agree with the sections: `qdcount` with the questions,
    /// `ancount` with the answers, and `nscount` and `arcount` must be
    /// zero.
    ///
    /// # Errors
    ///
    /// If the header counts do not match the sections, or a record is
    /// too big.
    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        check_count(Section::Question, self.header.qdcount, self.questions.len())?;
        check_count(Section::Answer, self.header.ancount, self.answers.len())?;
        check_count(Section::Authority, self.header.nscount, 0)?;
        check_count(Section::Additional, self.header.arcount, 0)?;

        self.header.serialise(buffer);
        for question in &self.questions {
            question.serialise(buffer);
        }
        for rr in &self.answers {
            rr.serialise(buffer)?;
        }

        Ok(())
    }
}

impl Header {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        let flag_qr = if self.is_response { HEADER_MASK_QR } else { 0 };
        let field_opcode =
            HEADER_MASK_OPCODE & (u16::from(u8::from(self.opcode)) << HEADER_OFFSET_OPCODE);
        let flag_aa = if self.is_authoritative {
            HEADER_MASK_AA
        } else {
            0
        };
        let flag_tc = if self.is_truncated { HEADER_MASK_TC } else { 0 };
        let flag_rd = if self.recursion_desired {
            HEADER_MASK_RD
        } else {
            0
        };
        let flag_ra = if self.recursion_available {
            HEADER_MASK_RA
        } else {
            0
        };
        let field_z = HEADER_MASK_Z & (u16::from(self.z) << HEADER_OFFSET_Z);
        let field_rcode = HEADER_MASK_RCODE & u16::from(u8::from(self.rcode));

        buffer.write_u16(self.id);
        buffer.write_u16(
            flag_qr | field_opcode | flag_aa | flag_tc | flag_rd | flag_ra | field_z | field_rcode,
        );
        buffer.write_u16(self.qdcount);
        buffer.write_u16(self.ancount);
        buffer.write_u16(self.nscount);
        buffer.write_u16(self.arcount);
    }
}

impl Question {
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        self.name.serialise(buffer);
        buffer.write_u16(self.qtype.into());
        buffer.write_u16(self.qclass.into());
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the RDATA is too long.
    pub fn serialise(&self, buffer: &mut WritableBuffer) -> Result<(), Error> {
        self.name.serialise(buffer);
        buffer.write_u16(self.rtype_with_data.rtype().into());
        buffer.write_u16(self.rclass.into());
        buffer.write_u32(self.ttl);

        match &self.rtype_with_data {
            RecordTypeWithData::A { address } => {
                buffer.write_u16(4);
                buffer.write_octets(&address.octets());
            }
            RecordTypeWithData::Uninterpreted { octets, .. } => {
                buffer.write_u16(usize_to_u16(octets.len())?);
                buffer.write_octets(octets);
            }
        }

        Ok(())
    }
}

impl DomainName {
    /// Names are always written uncompressed.
    pub fn serialise(&self, buffer: &mut WritableBuffer) {
        for label in &self.labels {
            // a `DomainName` never holds a label over 63 octets
            buffer.write_u8(label.len() as u8);
            buffer.write_octets(label);
        }
        buffer.write_u8(0);
    }
}

/// A section of a message, for error reporting.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Section {
    Question,
    Answer,
    Authority,
    Additional,
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Section::Question => write!(f, "question"),
            Section::Answer => write!(f, "answer"),
            Section::Authority => write!(f, "authority"),
            Section::Additional => write!(f, "additional"),
        }
    }
}

/// Errors encountered when serialising a message.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Error {
    /// A counter does not fit in the desired width.
    CounterTooLarge { counter: usize, bits: u32 },

    /// A header count does not match the number of entries in its
    /// section.
    CountMismatch {
        section: Section,
        declared: u16,
        actual: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::CounterTooLarge { counter, bits } => {
                write!(f, "'{counter}' cannot be converted to a u{bits}")
            }
            Error::CountMismatch {
                section,
                declared,
                actual,
            } => write!(
                f,
                "header declares {declared} {section} entries but there are {actual}"
            ),
        }
    }
}

impl std::error::Error for Error {}

/// A buffer which can be written to, for serialisation purposes.
pub struct WritableBuffer {
    pub octets: BytesMut,
}

impl Default for WritableBuffer {
    fn default() -> Self {
        Self {
            octets: BytesMut::with_capacity(UDP_MAX_SIZE),
        }
    }
}

impl WritableBuffer {
    pub fn index(&self) -> usize {
        self.octets.len()
    }

    pub fn write_u8(&mut self, octet: u8) {
        self.octets.put_u8(octet);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.octets.put_u16(value);
    }

    pub fn write_u32(&mut self, value: u32) {
        self.octets.put_u32(value);
    }

    pub fn write_octets(&mut self, octets: &[u8]) {
        self.octets.put_slice(octets);
    }
}

/// Helper function to convert a `usize` into a `u16` (or return an error).
///
/// # Errors
///
/// If the value cannot be converted.
pub fn usize_to_u16(counter: usize) -> Result<u16, Error> {
    if let Ok(t) = u16::try_from(counter) {
        Ok(t)
    } else {
        Err(Error::CounterTooLarge {
            counter,
            bits: u16::BITS,
        })
    }
}

fn check_count(section: Section, declared: u16, actual: usize) -> Result<(), Error> {
    if usize::from(declared) == actual {
        Ok(())
    } else {
        Err(Error::CountMismatch {
            section,
            declared,
            actual,
        })
    }
}
