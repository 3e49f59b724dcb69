use fake::{Fake, Faker};
use std::net::Ipv4Addr;

use dnsshim::protocol::deserialise::ConsumableBuffer;
use dnsshim::protocol::serialise::WritableBuffer;
use dnsshim::protocol::wire_types::*;

#[test]
fn roundtrip_message() {
    for _ in 0..100 {
        let original = arbitrary_message();
        let deserialised = Message::from_octets(&original.to_octets().unwrap());

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_header() {
    for _ in 0..100 {
        let original = arbitrary_header();

        let mut buffer = WritableBuffer::default();
        original.serialise(&mut buffer);
        let deserialised = Header::deserialise(&mut ConsumableBuffer::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_question() {
    for _ in 0..100 {
        let original = arbitrary_question();

        let mut buffer = WritableBuffer::default();
        original.serialise(&mut buffer);
        let deserialised = Question::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_resourcerecord() {
    for _ in 0..100 {
        let original = arbitrary_resourcerecord();

        let mut buffer = WritableBuffer::default();
        original.serialise(&mut buffer).unwrap();
        let deserialised =
            ResourceRecord::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets));

        assert_eq!(Ok(original), deserialised);
    }
}

#[test]
fn roundtrip_domainname() {
    for _ in 0..100 {
        let original = arbitrary_domainname();

        let mut buffer = WritableBuffer::default();
        original.serialise(&mut buffer);
        let deserialised = DomainName::deserialise(0, &mut ConsumableBuffer::new(&buffer.octets));

        assert_eq!(Ok(original.clone()), deserialised);
        assert_eq!(original.encoded_len(), buffer.octets.len());
    }
}

#[test]
fn roundtrip_domainname_dotted_string() {
    for _ in 0..100 {
        let original = arbitrary_domainname();

        assert_eq!(
            Some(original.clone()),
            DomainName::from_dotted_string(&original.to_dotted_string())
        );
    }
}

fn arbitrary_message() -> Message {
    let mut header = arbitrary_header();
    // keep runtime sane
    header.qdcount = (0..10).fake();
    header.ancount = (0..10).fake();
    // not carried
    header.nscount = 0;
    header.arcount = 0;

    let mut questions = Vec::with_capacity(header.qdcount as usize);
    let mut answers = Vec::with_capacity(header.ancount as usize);

    for _ in 0..header.qdcount {
        questions.push(arbitrary_question());
    }
    for _ in 0..header.ancount {
        answers.push(arbitrary_resourcerecord());
    }

    Message {
        header,
        questions,
        answers,
    }
}

fn arbitrary_header() -> Header {
    Header {
        id: Faker.fake(),
        is_response: Faker.fake(),
        opcode: Opcode::from((0..16).fake::<u8>()),
        is_authoritative: Faker.fake(),
        is_truncated: Faker.fake(),
        recursion_desired: Faker.fake(),
        recursion_available: Faker.fake(),
        z: (0..8).fake(),
        rcode: Rcode::from((0..16).fake::<u8>()),
        qdcount: Faker.fake(),
        ancount: Faker.fake(),
        nscount: Faker.fake(),
        arcount: Faker.fake(),
    }
}

fn arbitrary_question() -> Question {
    Question {
        name: arbitrary_domainname(),
        qtype: QueryType::from(Faker.fake::<u16>()),
        qclass: QueryClass::from(Faker.fake::<u16>()),
    }
}

fn arbitrary_resourcerecord() -> ResourceRecord {
    ResourceRecord {
        name: arbitrary_domainname(),
        rtype_with_data: arbitrary_recordtypewithdata(),
        rclass: RecordClass::from(Faker.fake::<u16>()),
        ttl: Faker.fake(),
    }
}

fn arbitrary_recordtypewithdata() -> RecordTypeWithData {
    // this should match the `RecordTypeWithData` deserialisation
    match RecordType::from(Faker.fake::<u16>()) {
        RecordType::A => RecordTypeWithData::A {
            address: Ipv4Addr::from(Faker.fake::<u32>()),
        },
        rtype => RecordTypeWithData::Uninterpreted {
            rtype,
            octets: arbitrary_octets((0..64).fake()),
        },
    }
}

fn arbitrary_domainname() -> DomainName {
    let num_labels = (0..5).fake::<usize>();
    let mut labels = Vec::with_capacity(num_labels);

    for _ in 0..num_labels {
        let label_len = (1..10).fake::<usize>();
        let mut label = Vec::with_capacity(label_len);
        for _ in 0..label_len {
            // includes '.' and '\\', which are escaped in dotted form
            label.push((33..127).fake::<u8>());
        }
        labels.push(label);
    }

    DomainName::from_labels(labels).unwrap()
}

fn arbitrary_octets(len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(Faker.fake());
    }
    out
}
