use std::net::Ipv4Addr;

use crate::protocol::wire_types::*;

/// The default address given to every question when there is no
/// upstream resolver.
pub const DEFAULT_LOCAL_ADDRESS: Ipv4Addr = Ipv4Addr::new(8, 8, 8, 8);

/// The default TTL of locally-built answers.
pub const DEFAULT_ANSWER_TTL: u32 = 60;

/// Where the address in a locally-built answer comes from.
pub trait AnswerSource {
    fn address_for(&self, question: &Question) -> Ipv4Addr;

    fn ttl(&self) -> u32 {
        DEFAULT_ANSWER_TTL
    }
}

/// Answers every question with the same address.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StaticAnswer {
    pub address: Ipv4Addr,
    pub ttl: u32,
}

impl Default for StaticAnswer {
    fn default() -> Self {
        Self {
            address: DEFAULT_LOCAL_ADDRESS,
            ttl: DEFAULT_ANSWER_TTL,
        }
    }
}

impl AnswerSource for StaticAnswer {
    fn address_for(&self, _question: &Question) -> Ipv4Addr {
        self.address
    }

    fn ttl(&self) -> u32 {
        self.ttl
    }
}

/// Build a response to `query` without asking anyone else: every
/// question gets one `IN A` answer, in question order, naming the
/// question's domain.
///
/// A query with a non-standard opcode is answered the same way, but
/// with `NotImplemented` as the RCODE.
pub fn build(query: &Message, source: &impl AnswerSource) -> Message {
    let mut response = query.make_response();

    let answers = query
        .questions
        .iter()
        .map(|question| ResourceRecord {
            name: question.name.clone(),
            rtype_with_data: RecordTypeWithData::A {
                address: source.address_for(question),
            },
            rclass: RecordClass::IN,
            ttl: source.ttl(),
        })
        .collect();
    response.push_answers(answers);

    response
}
