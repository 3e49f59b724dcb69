use bytes::BytesMut;
use futures::future::join_all;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::Instrument;

use crate::protocol::deserialise::ProtocolError;
use crate::protocol::serialise;
use crate::protocol::wire_types::*;

/// The default bound on a single upstream exchange.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);

/// A transport to an upstream resolver: one request datagram out, one
/// reply datagram back.
pub trait Upstream {
    fn exchange(
        &self,
        request: &[u8],
    ) -> impl Future<Output = Result<BytesMut, UpstreamError>> + Send;
}

/// Talks to an upstream resolver over UDP, with a fresh socket per
/// exchange.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct UdpUpstream {
    pub address: SocketAddr,
    pub timeout: Duration,
}

impl UdpUpstream {
    pub fn new(address: SocketAddr) -> Self {
        Self {
            address,
            timeout: DEFAULT_UPSTREAM_TIMEOUT,
        }
    }

    /// Timeout-less version of `exchange`.
    async fn exchange_notimeout(&self, request: &[u8]) -> Result<BytesMut, UpstreamError> {
        let bind_address: SocketAddr = if self.address.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let sock = UdpSocket::bind(bind_address).await?;
        sock.connect(self.address).await?;
        sock.send(request).await?;

        let mut buf = BytesMut::zeroed(UDP_MAX_SIZE);
        let size = sock.recv(&mut buf).await?;
        buf.truncate(size);

        Ok(buf)
    }
}

impl Upstream for UdpUpstream {
    async fn exchange(&self, request: &[u8]) -> Result<BytesMut, UpstreamError> {
        if let Ok(res) = timeout(self.timeout, self.exchange_notimeout(request)).await {
            res
        } else {
            tracing::debug!("timed out");
            Err(UpstreamError::Timeout)
        }
    }
}

/// Answer a query by asking the upstream resolver about each of its
/// questions separately.  The exchanges run concurrently, and their
/// `A` answers are concatenated in question order.
///
/// A question whose exchange fails contributes no answers.  If every
/// exchange fails the response is `ServerFailure`.  A query with a
/// non-standard opcode is not forwarded at all, and gets
/// `NotImplemented`.
pub async fn forward<U: Upstream>(upstream: &U, query: &Message) -> Message {
    let mut response = query.make_response();

    if query.header.opcode != Opcode::Standard {
        return response;
    }

    let exchanges = query.questions.iter().map(|question| {
        forward_question(upstream, question, query.header.recursion_desired)
            .instrument(tracing::error_span!("forward_question", %question))
    });
    let results = join_all(exchanges).await;

    let mut any_succeeded = query.questions.is_empty();
    let mut answers = Vec::new();
    for (question, result) in query.questions.iter().zip(results) {
        match result {
            Ok(reply) => {
                any_succeeded = true;
                if reply.header.rcode == Rcode::NameError && query.questions.len() == 1 {
                    response.header.rcode = Rcode::NameError;
                }
                // other record data may hold compression pointers into
                // the upstream reply, which mean nothing in ours
                answers.extend(
                    reply
                        .answers
                        .into_iter()
                        .filter(|rr| matches!(rr.rtype_with_data, RecordTypeWithData::A { .. })),
                );
            }
            Err(error) => tracing::warn!(%question, %error, "upstream exchange failed"),
        }
    }

    if !any_succeeded {
        response.header.rcode = Rcode::ServerFailure;
    }

    response.push_answers(answers);
    response
}

/// Send one question upstream, under a fresh random ID, and return
/// the validated reply.
///
/// # Errors
///
/// See `UpstreamError`.
pub async fn forward_question<U: Upstream>(
    upstream: &U,
    question: &Question,
    recursion_desired: bool,
) -> Result<Message, UpstreamError> {
    let mut request = Message::from_question(rand::thread_rng().gen(), question.clone());
    request.header.recursion_desired = recursion_desired;

    let serialised = request.to_octets()?;
    let octets = upstream.exchange(&serialised).await?;
    let reply = Message::from_octets(&octets)?;

    tracing::debug!(id = %reply.header.id, rcode = ?reply.header.rcode, answers = %reply.answers.len(), "got reply");

    if !response_matches_request(&request, &reply) {
        return Err(UpstreamError::Mismatched);
    }

    match reply.header.rcode {
        Rcode::NoError | Rcode::NameError => Ok(reply),
        rcode => Err(UpstreamError::Rejected(rcode)),
    }
}

/// Very basic validation that an upstream reply matches a request:
///
/// - Check the ID, opcode, and questions match.
///
/// - Check it is a response.
///
/// - Check it is not truncated.
pub fn response_matches_request(request: &Message, response: &Message) -> bool {
    if request.header.id != response.header.id {
        return false;
    }
    if !response.header.is_response {
        return false;
    }
    if request.header.opcode != response.header.opcode {
        return false;
    }
    if response.header.is_truncated {
        return false;
    }
    if request.questions != response.questions {
        return false;
    }

    true
}

/// An error that can occur when forwarding a question.
#[derive(Debug)]
pub enum UpstreamError {
    /// No reply arrived in time.
    Timeout,

    /// The socket could not be set up, or sending or receiving failed.
    Unreachable(io::Error),

    /// The reply could not be parsed.
    Malformed(ProtocolError),

    /// The reply is not an answer to the request.
    Mismatched,

    /// The reply carries an error other than `NameError`.
    Rejected(Rcode),

    /// The request could not be serialised.
    Serialise(serialise::Error),
}

impl fmt::Display for UpstreamError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            UpstreamError::Timeout => write!(f, "timed out"),
            UpstreamError::Unreachable(error) => write!(f, "upstream unreachable: {error}"),
            UpstreamError::Malformed(error) => write!(f, "malformed reply: {error}"),
            UpstreamError::Mismatched => write!(f, "reply does not match request"),
            UpstreamError::Rejected(rcode) => write!(f, "upstream replied {rcode:?}"),
            UpstreamError::Serialise(error) => write!(f, "could not serialise request: {error}"),
        }
    }
}

impl std::error::Error for UpstreamError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UpstreamError::Unreachable(error) => Some(error),
            UpstreamError::Malformed(error) => Some(error),
            UpstreamError::Serialise(error) => Some(error),
            _ => None,
        }
    }
}

impl From<io::Error> for UpstreamError {
    fn from(error: io::Error) -> Self {
        UpstreamError::Unreachable(error)
    }
}

impl From<ProtocolError> for UpstreamError {
    fn from(error: ProtocolError) -> Self {
        UpstreamError::Malformed(error)
    }
}

impl From<serialise::Error> for UpstreamError {
    fn from(error: serialise::Error) -> Self {
        UpstreamError::Serialise(error)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use tokio::time::sleep;

    use super::*;
    use crate::protocol::wire_types::test_util::*;
    use crate::response::{self, StaticAnswer};

    /// How the scripted upstream treats a question, keyed by name.
    #[derive(Clone)]
    enum Script {
        Answer { delay_ms: u64, address: Ipv4Addr },
        CompressedCname { address: Ipv4Addr },
        NameError,
        ServerFailure,
        Unreachable,
        WrongId,
        Garbage,
    }

    struct ScriptedUpstream {
        scripts: HashMap<String, Script>,
    }

    impl ScriptedUpstream {
        fn new(scripts: &[(&str, Script)]) -> Self {
            Self {
                scripts: scripts
                    .iter()
                    .map(|(name, script)| (name.to_string(), script.clone()))
                    .collect(),
            }
        }
    }

    impl Upstream for ScriptedUpstream {
        async fn exchange(&self, request: &[u8]) -> Result<BytesMut, UpstreamError> {
            let request = Message::from_octets(request).unwrap();
            assert_eq!(1, request.questions.len());

            let question = &request.questions[0];
            let mut reply = request.make_response();

            match self.scripts.get(&question.name.to_dotted_string()) {
                Some(Script::Answer { delay_ms, address }) => {
                    sleep(Duration::from_millis(*delay_ms)).await;
                    let mut rr = a_record(&question.name.to_dotted_string(), *address);
                    rr.name = question.name.clone();
                    reply.push_answers(vec![rr]);
                }
                Some(Script::CompressedCname { address }) => {
                    // the CNAME target points at the question name
                    let cname = ResourceRecord {
                        name: question.name.clone(),
                        rtype_with_data: RecordTypeWithData::Uninterpreted {
                            rtype: RecordType::from(5),
                            octets: vec![0b1100_0000, 12],
                        },
                        rclass: RecordClass::IN,
                        ttl: 300,
                    };
                    let mut rr = a_record(&question.name.to_dotted_string(), *address);
                    rr.name = question.name.clone();
                    reply.push_answers(vec![cname, rr]);
                }
                Some(Script::NameError) => reply.header.rcode = Rcode::NameError,
                Some(Script::ServerFailure) => reply.header.rcode = Rcode::ServerFailure,
                Some(Script::Unreachable) | None => {
                    return Err(UpstreamError::Unreachable(io::Error::new(
                        io::ErrorKind::ConnectionRefused,
                        "refused",
                    )))
                }
                Some(Script::WrongId) => reply.header.id = reply.header.id.wrapping_add(1),
                Some(Script::Garbage) => return Ok(BytesMut::from(&[1, 2, 3][..])),
            }

            Ok(reply.to_octets().unwrap())
        }
    }

    fn query_for(names: &[&str]) -> Message {
        let mut query = Message::from_question(4321, a_question(names[0]));
        for name in &names[1..] {
            query.questions.push(a_question(name));
        }
        query.header.qdcount = names.len() as u16;
        query.header.recursion_desired = true;
        query
    }

    fn addresses(response: &Message) -> Vec<Ipv4Addr> {
        response
            .answers
            .iter()
            .filter_map(|rr| match rr.rtype_with_data {
                RecordTypeWithData::A { address } => Some(address),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn forward_keeps_question_order() {
        let upstream = ScriptedUpstream::new(&[
            (
                "slow.example.com",
                Script::Answer {
                    delay_ms: 100,
                    address: Ipv4Addr::new(1, 1, 1, 1),
                },
            ),
            (
                "fast.example.com",
                Script::Answer {
                    delay_ms: 0,
                    address: Ipv4Addr::new(2, 2, 2, 2),
                },
            ),
        ]);
        let query = query_for(&["slow.example.com", "fast.example.com"]);

        let response = forward(&upstream, &query).await;

        assert_eq!(4321, response.header.id);
        assert!(response.header.is_response);
        assert!(response.header.recursion_desired);
        assert_eq!(Rcode::NoError, response.header.rcode);
        assert_eq!(2, response.header.qdcount);
        assert_eq!(2, response.header.ancount);
        assert_eq!(query.questions, response.questions);
        assert_eq!(
            vec![domain("slow.example.com"), domain("fast.example.com")],
            response
                .answers
                .iter()
                .map(|rr| rr.name.clone())
                .collect::<Vec<_>>()
        );
        assert_eq!(
            vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(2, 2, 2, 2)],
            addresses(&response)
        );
        assert!(response.to_octets().is_ok());
    }

    #[tokio::test]
    async fn forward_drops_non_address_answers() {
        let upstream = ScriptedUpstream::new(&[
            (
                "first.example.com",
                Script::Answer {
                    delay_ms: 0,
                    address: Ipv4Addr::new(1, 1, 1, 1),
                },
            ),
            (
                "second.example.org",
                Script::CompressedCname {
                    address: Ipv4Addr::new(5, 5, 5, 5),
                },
            ),
        ]);
        let query = query_for(&["first.example.com", "second.example.org"]);

        let response = forward(&upstream, &query).await;

        assert_eq!(Rcode::NoError, response.header.rcode);
        assert_eq!(2, response.header.ancount);
        assert!(response
            .answers
            .iter()
            .all(|rr| matches!(rr.rtype_with_data, RecordTypeWithData::A { .. })));
        assert_eq!(
            vec![Ipv4Addr::new(1, 1, 1, 1), Ipv4Addr::new(5, 5, 5, 5)],
            addresses(&response)
        );

        let decoded = Message::from_octets(&response.to_octets().unwrap()).unwrap();
        assert_eq!(response.answers, decoded.answers);
    }

    #[tokio::test]
    async fn forward_one_question_fails() {
        let upstream = ScriptedUpstream::new(&[
            ("broken.example.com", Script::Unreachable),
            (
                "ok.example.com",
                Script::Answer {
                    delay_ms: 0,
                    address: Ipv4Addr::new(3, 3, 3, 3),
                },
            ),
        ]);
        let query = query_for(&["broken.example.com", "ok.example.com"]);

        let response = forward(&upstream, &query).await;

        assert_eq!(Rcode::NoError, response.header.rcode);
        assert_eq!(2, response.header.qdcount);
        assert_eq!(1, response.header.ancount);
        assert_eq!(vec![Ipv4Addr::new(3, 3, 3, 3)], addresses(&response));
    }

    #[tokio::test]
    async fn forward_all_questions_fail() {
        let upstream = ScriptedUpstream::new(&[
            ("a.example.com", Script::Unreachable),
            ("b.example.com", Script::WrongId),
            ("c.example.com", Script::Garbage),
            ("d.example.com", Script::ServerFailure),
        ]);
        let query = query_for(&[
            "a.example.com",
            "b.example.com",
            "c.example.com",
            "d.example.com",
        ]);

        let response = forward(&upstream, &query).await;

        assert_eq!(Rcode::ServerFailure, response.header.rcode);
        assert_eq!(4, response.header.qdcount);
        assert_eq!(0, response.header.ancount);
        assert!(response.to_octets().is_ok());
    }

    #[tokio::test]
    async fn forward_no_questions() {
        let mut query = query_for(&["example.com"]);
        query.questions.clear();
        query.header.qdcount = 0;

        let response = forward(&ScriptedUpstream::new(&[]), &query).await;

        assert_eq!(Rcode::NoError, response.header.rcode);
        assert_eq!(0, response.header.ancount);
    }

    #[tokio::test]
    async fn forward_name_error_single_question() {
        let upstream = ScriptedUpstream::new(&[("nx.example.com", Script::NameError)]);

        let response = forward(&upstream, &query_for(&["nx.example.com"])).await;

        assert_eq!(Rcode::NameError, response.header.rcode);
        assert_eq!(0, response.header.ancount);
    }

    #[tokio::test]
    async fn forward_non_standard_opcode() {
        let mut query = query_for(&["example.com"]);
        query.header.opcode = Opcode::Status;

        // every question would fail if it were forwarded
        let response = forward(&ScriptedUpstream::new(&[]), &query).await;

        assert_eq!(Rcode::NotImplemented, response.header.rcode);
        assert_eq!(Opcode::Status, response.header.opcode);
        assert_eq!(query.questions, response.questions);
        assert_eq!(0, response.header.ancount);
    }

    #[tokio::test]
    async fn forward_question_errors() {
        let upstream = ScriptedUpstream::new(&[
            ("a.example.com", Script::Unreachable),
            ("b.example.com", Script::WrongId),
            ("c.example.com", Script::Garbage),
            ("d.example.com", Script::ServerFailure),
        ]);

        assert!(matches!(
            forward_question(&upstream, &a_question("a.example.com"), true).await,
            Err(UpstreamError::Unreachable(_))
        ));
        assert!(matches!(
            forward_question(&upstream, &a_question("b.example.com"), true).await,
            Err(UpstreamError::Mismatched)
        ));
        assert!(matches!(
            forward_question(&upstream, &a_question("c.example.com"), true).await,
            Err(UpstreamError::Malformed(ProtocolError::MalformedHeader(_)))
        ));
        assert!(matches!(
            forward_question(&upstream, &a_question("d.example.com"), true).await,
            Err(UpstreamError::Rejected(Rcode::ServerFailure))
        ));
    }

    #[tokio::test]
    async fn udp_upstream_exchange() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream = UdpUpstream {
            address: server.local_addr().unwrap(),
            timeout: Duration::from_secs(5),
        };

        let handle = tokio::spawn(async move {
            let mut buf = vec![0u8; 512];
            let (size, peer) = server.recv_from(&mut buf).await.unwrap();
            let query = Message::from_octets(&buf[..size]).unwrap();
            assert!(query.header.recursion_desired);
            let answer = StaticAnswer {
                address: Ipv4Addr::new(192, 0, 2, 1),
                ttl: 30,
            };
            let reply = response::build(&query, &answer).to_octets().unwrap();
            server.send_to(&reply, peer).await.unwrap();
        });

        let response = forward(&upstream, &query_for(&["example.com"])).await;
        handle.await.unwrap();

        assert_eq!(Rcode::NoError, response.header.rcode);
        assert_eq!(vec![Ipv4Addr::new(192, 0, 2, 1)], addresses(&response));
        assert_eq!(30, response.answers[0].ttl);
    }

    #[tokio::test]
    async fn udp_upstream_timeout() {
        // bound but never read from
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let upstream = UdpUpstream {
            address: server.local_addr().unwrap(),
            timeout: Duration::from_millis(50),
        };

        assert!(matches!(
            upstream.exchange(&[0; 12]).await,
            Err(UpstreamError::Timeout)
        ));

        let response = forward(&upstream, &query_for(&["example.com"])).await;
        assert_eq!(Rcode::ServerFailure, response.header.rcode);
    }

    #[test]
    fn response_matches_request_accepts() {
        let request = Message::from_question(1, a_question("example.com"));
        let mut response = request.make_response();
        response.push_answers(vec![a_record("example.com", Ipv4Addr::new(1, 2, 3, 4))]);

        assert!(response_matches_request(&request, &response));
    }

    #[test]
    fn response_matches_request_checks() {
        let request = Message::from_question(1, a_question("example.com"));

        let mut response = request.make_response();
        response.header.id += 1;
        assert!(!response_matches_request(&request, &response));

        let mut response = request.make_response();
        response.header.is_response = false;
        assert!(!response_matches_request(&request, &response));

        let mut response = request.make_response();
        response.header.opcode = Opcode::Inverse;
        assert!(!response_matches_request(&request, &response));

        let mut response = request.make_response();
        response.header.is_truncated = true;
        assert!(!response_matches_request(&request, &response));

        let mut response = request.make_response();
        response.questions = vec![a_question("example.net")];
        assert!(!response_matches_request(&request, &response));
    }

    #[test]
    fn response_matches_request_does_not_check_aa() {
        let request = Message::from_question(1, a_question("example.com"));
        let mut response = request.make_response();
        response.header.is_authoritative = true;

        assert!(response_matches_request(&request, &response));
    }
}
