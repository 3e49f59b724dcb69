//! Deserialisation of DNS messages from the network.  See the
//! `wire_types` module for details of the format.

use std::fmt;
use std::net::Ipv4Addr;

use crate::protocol::wire_types::*;

/// The smallest possible question: the root name and two `u16`s.
const MIN_QUESTION_SIZE: usize = 5;

/// The smallest possible resource record: the root name, three `u16`s,
/// and a `u32`.
const MIN_RESOURCE_RECORD_SIZE: usize = 11;

impl Message {
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn from_octets(octets: &[u8]) -> Result<Self, ProtocolError> {
        Self::deserialise(&mut ConsumableBuffer::new(octets))
    }

    /// Parse the header, then exactly `qdcount` questions and
    /// `ancount` answers.  Anything after the answer section is left
    /// in the buffer.
    ///
    /// # Errors
    ///
    /// If the message cannot be parsed.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, ProtocolError> {
        let header = Header::deserialise(buffer)?;

        // the counts come off the network, so don't trust them for
        // preallocation
        let mut questions = Vec::with_capacity(
            usize::from(header.qdcount).min(buffer.remaining() / MIN_QUESTION_SIZE),
        );
        let mut answers = Vec::with_capacity(
            usize::from(header.ancount).min(buffer.remaining() / MIN_RESOURCE_RECORD_SIZE),
        );

        for _ in 0..header.qdcount {
            questions.push(Question::deserialise(header.id, buffer)?);
        }
        for _ in 0..header.ancount {
            answers.push(ResourceRecord::deserialise(header.id, buffer)?);
        }

        Ok(Self {
            header,
            questions,
            answers,
        })
    }
}

impl Header {
    /// # Errors
    ///
    /// If the header is too short.
    pub fn deserialise(buffer: &mut ConsumableBuffer) -> Result<Self, ProtocolError> {
        let id = buffer.next_u16().ok_or(ProtocolError::CompletelyBusted)?;
        let flags = buffer
            .next_u16()
            .ok_or(ProtocolError::MalformedHeader(id))?;
        let qdcount = buffer
            .next_u16()
            .ok_or(ProtocolError::MalformedHeader(id))?;
        let ancount = buffer
            .next_u16()
            .ok_or(ProtocolError::MalformedHeader(id))?;
        let nscount = buffer
            .next_u16()
            .ok_or(ProtocolError::MalformedHeader(id))?;
        let arcount = buffer
            .next_u16()
            .ok_or(ProtocolError::MalformedHeader(id))?;

        Ok(Self {
            id,
            is_response: flags & HEADER_MASK_QR != 0,
            opcode: Opcode::from(((flags & HEADER_MASK_OPCODE) >> HEADER_OFFSET_OPCODE) as u8),
            is_authoritative: flags & HEADER_MASK_AA != 0,
            is_truncated: flags & HEADER_MASK_TC != 0,
            recursion_desired: flags & HEADER_MASK_RD != 0,
            recursion_available: flags & HEADER_MASK_RA != 0,
            z: ((flags & HEADER_MASK_Z) >> HEADER_OFFSET_Z) as u8,
            rcode: Rcode::from((flags & HEADER_MASK_RCODE) as u8),
            qdcount,
            ancount,
            nscount,
            arcount,
        })
    }
}

impl Question {
    /// # Errors
    ///
    /// If the question cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, ProtocolError> {
        let name = DomainName::deserialise(id, buffer)?;
        let qtype = buffer
            .next_u16()
            .ok_or(ProtocolError::TruncatedQuestion(id))?;
        let qclass = buffer
            .next_u16()
            .ok_or(ProtocolError::TruncatedQuestion(id))?;

        Ok(Self {
            name,
            qtype: QueryType::from(qtype),
            qclass: QueryClass::from(qclass),
        })
    }
}

impl ResourceRecord {
    /// # Errors
    ///
    /// If the record cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, ProtocolError> {
        let name = DomainName::deserialise(id, buffer)?;
        let rtype = buffer
            .next_u16()
            .ok_or(ProtocolError::TruncatedMessage(id))?;
        let rclass = buffer
            .next_u16()
            .ok_or(ProtocolError::TruncatedMessage(id))?;
        let ttl = buffer
            .next_u32()
            .ok_or(ProtocolError::TruncatedMessage(id))?;
        let rdlength = buffer
            .next_u16()
            .ok_or(ProtocolError::TruncatedMessage(id))?;
        let rdata = buffer
            .take(rdlength.into())
            .ok_or(ProtocolError::TruncatedMessage(id))?;

        let rtype_with_data = match RecordType::from(rtype) {
            RecordType::A => match <[u8; 4]>::try_from(rdata) {
                Ok(octets) => RecordTypeWithData::A {
                    address: Ipv4Addr::from(octets),
                },
                Err(_) => return Err(ProtocolError::InvalidAddress(id)),
            },
            rtype => RecordTypeWithData::Uninterpreted {
                rtype,
                octets: rdata.to_vec(),
            },
        };

        Ok(Self {
            name,
            rtype_with_data,
            rclass: RecordClass::from(rclass),
            ttl,
        })
    }
}

impl DomainName {
    /// Parse a possibly-compressed name.
    ///
    /// A compression pointer may only point backwards: to before its
    /// own position, before the start of the name and, if it was
    /// reached by following an earlier pointer, before that pointer's
    /// target.  Since targets strictly decrease, parsing always
    /// terminates.  At most `MAX_POINTER_JUMPS` pointers are followed.
    ///
    /// The buffer is left just after the first pointer, if there was
    /// one, or after the terminating null label otherwise.
    ///
    /// See section 4.1.4 of RFC 1035.
    ///
    /// # Errors
    ///
    /// If the domain cannot be parsed.
    pub fn deserialise(id: u16, buffer: &mut ConsumableBuffer) -> Result<Self, ProtocolError> {
        let mut labels = Vec::<Vec<u8>>::with_capacity(5);
        // count the terminating null label up front
        let mut len = 1;
        let mut cursor = buffer.at_offset(buffer.position);
        let mut resume_at = None;
        let mut lowest_target = cursor.position;
        let mut jumps = 0;

        loop {
            let position = cursor.position;
            let size = cursor
                .next_u8()
                .ok_or(ProtocolError::TruncatedMessage(id))?;

            if size == 0 {
                break;
            }

            if size & POINTER_TAG == POINTER_TAG {
                let lo = cursor
                    .next_u8()
                    .ok_or(ProtocolError::TruncatedMessage(id))?;
                let target = usize::from(u16::from_be_bytes([size & !POINTER_TAG, lo]));

                if target >= cursor.octets.len() {
                    return Err(ProtocolError::PointerOutOfRange(id));
                }
                if target >= position || target >= lowest_target || jumps == MAX_POINTER_JUMPS {
                    return Err(ProtocolError::PointerCycle(id));
                }

                jumps += 1;
                lowest_target = target;
                resume_at.get_or_insert(cursor.position);
                cursor = cursor.at_offset(target);
                continue;
            }

            if usize::from(size) > MAX_LABEL_LEN {
                return Err(ProtocolError::LabelTooLong(id));
            }

            let label = cursor
                .take(size.into())
                .ok_or(ProtocolError::TruncatedMessage(id))?;
            if !label.is_ascii() {
                return Err(ProtocolError::LabelNotAscii(id));
            }

            len += label.len() + 1;
            if len > MAX_NAME_LEN {
                return Err(ProtocolError::NameTooLong(id));
            }

            labels.push(label.to_vec());
        }

        buffer.position = resume_at.unwrap_or(cursor.position);

        Ok(DomainName { labels })
    }
}

/// Errors encountered when parsing a datagram.  In all the errors
/// which have a `u16` parameter, that is the ID from the header - so
/// that an error response can be sent.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ProtocolError {
    /// The datagram is not even 2 octets long, so it doesn't even
    /// contain a valid ID.  An error cannot even be sent back to the
    /// client in this case as, without an ID, it cannot be linked
    /// with the correct query.
    CompletelyBusted,

    /// The header is shorter than 12 octets.
    MalformedHeader(u16),

    /// A question ends before its type and class.
    TruncatedQuestion(u16),

    /// The message ends before all the names and records its header
    /// promises.
    TruncatedMessage(u16),

    /// A domain is over 255 octets in size.
    NameTooLong(u16),

    /// A label length is over 63, but is not a pointer.
    LabelTooLong(u16),

    /// A label contains a non-ASCII octet.
    LabelNotAscii(u16),

    /// A domain pointer does not point strictly backwards, or too
    /// many pointers were followed.
    PointerCycle(u16),

    /// A domain pointer points outside the message.
    PointerOutOfRange(u16),

    /// An `A` record does not have exactly 4 octets of data.
    InvalidAddress(u16),
}

impl ProtocolError {
    pub fn id(self) -> Option<u16> {
        match self {
            ProtocolError::CompletelyBusted => None,
            ProtocolError::MalformedHeader(id)
            | ProtocolError::TruncatedQuestion(id)
            | ProtocolError::TruncatedMessage(id)
            | ProtocolError::NameTooLong(id)
            | ProtocolError::LabelTooLong(id)
            | ProtocolError::LabelNotAscii(id)
            | ProtocolError::PointerCycle(id)
            | ProtocolError::PointerOutOfRange(id)
            | ProtocolError::InvalidAddress(id) => Some(id),
        }
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolError::CompletelyBusted => write!(f, "message too short to contain an ID"),
            ProtocolError::MalformedHeader(_) => write!(f, "header too short"),
            ProtocolError::TruncatedQuestion(_) => write!(f, "question too short"),
            ProtocolError::TruncatedMessage(_) => write!(f, "message shorter than its counts"),
            ProtocolError::NameTooLong(_) => write!(f, "domain name over 255 octets"),
            ProtocolError::LabelTooLong(_) => write!(f, "label over 63 octets"),
            ProtocolError::LabelNotAscii(_) => write!(f, "label is not ASCII"),
            ProtocolError::PointerCycle(_) => write!(f, "domain pointer does not point backwards"),
            ProtocolError::PointerOutOfRange(_) => write!(f, "domain pointer outside message"),
            ProtocolError::InvalidAddress(_) => write!(f, "A record data is not 4 octets"),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// A buffer which will be consumed by the parsing process.
pub struct ConsumableBuffer<'a> {
    octets: &'a [u8],
    position: usize,
}

impl<'a> ConsumableBuffer<'a> {
    pub fn new(octets: &'a [u8]) -> Self {
        Self {
            octets,
            position: 0,
        }
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.octets.len().saturating_sub(self.position)
    }

    pub fn next_u8(&mut self) -> Option<u8> {
        let octet = *self.octets.get(self.position)?;
        self.position += 1;
        Some(octet)
    }

    pub fn next_u16(&mut self) -> Option<u16> {
        let octets = self.take(2)?;
        Some(u16::from_be_bytes([octets[0], octets[1]]))
    }

    pub fn next_u32(&mut self) -> Option<u32> {
        let octets = self.take(4)?;
        Some(u32::from_be_bytes([octets[0], octets[1], octets[2], octets[3]]))
    }

    pub fn take(&mut self, size: usize) -> Option<&'a [u8]> {
        if self.remaining() >= size {
            let slice = &self.octets[self.position..self.position + size];
            self.position += size;
            Some(slice)
        } else {
            None
        }
    }

    /// A new cursor over the same octets, at an absolute position.
    pub fn at_offset(&self, position: usize) -> ConsumableBuffer<'a> {
        Self {
            octets: self.octets,
            position,
        }
    }
}
