//! Request builders and reply interpreters.
//!
//! Publishers, subscribers and the broker build the same handful of
//! requests and read the same replies. These functions are the whole client
//! side of the protocol; [`DiscoveryClient`](super::DiscoveryClient) only
//! adds the transport.

use protocol::{
    Chain, Endpoint, ExitReq, IsReadyReq, LookupAllPubsReq, LookupByTopicReq, Message, RegisterReq, RegisterResult, Role,
};

use crate::client::ClientError;

pub fn register(role: Role, endpoint: &Endpoint, topics: &[String]) -> Message {
    Message::Register(RegisterReq {
        role,
        id: endpoint.id.clone(),
        address: endpoint.address.clone(),
        port: endpoint.port,
        topics: topics.to_vec(),
        successor_flag: false,
        chain: Chain::new(),
        ring_params: None,
    })
}

pub fn is_ready() -> Message {
    Message::IsReady(IsReadyReq::default())
}

pub fn lookup_by_topic(topics: &[String]) -> Message {
    Message::LookupByTopic(LookupByTopicReq {
        topics: topics.to_vec(),
        ..Default::default()
    })
}

pub fn lookup_all_pubs() -> Message {
    Message::LookupAllPubs(LookupAllPubsReq::default())
}

pub fn exit(role: Role, endpoint: &Endpoint) -> Message {
    Message::Exit(ExitReq {
        role,
        id: endpoint.id.clone(),
        address: endpoint.address.clone(),
        port: endpoint.port,
        origin: None,
    })
}

pub fn register_result(reply: Message) -> Result<(), ClientError> {
    match reply {
        Message::RegisterResp(resp) => match resp.result {
            RegisterResult::Success => Ok(()),
            RegisterResult::Failure(reason) => Err(ClientError::Rejected(reason)),
        },
        other => Err(unexpected(other)),
    }
}

pub fn ready_result(reply: Message) -> Result<bool, ClientError> {
    match reply {
        Message::IsReadyResp(resp) => Ok(resp.ready),
        other => Err(unexpected(other)),
    }
}

/// An empty list is a valid answer: nobody has registered yet.
pub fn lookup_result(reply: Message) -> Result<Vec<Endpoint>, ClientError> {
    match reply {
        Message::LookupResp(resp) => Ok(resp.addresses),
        other => Err(unexpected(other)),
    }
}

pub fn ack_result(reply: Message) -> Result<(), ClientError> {
    match reply {
        Message::Ack => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn unexpected(reply: Message) -> ClientError {
    match reply {
        Message::Error(err) => ClientError::Server {
            kind: err.kind,
            message: err.message,
        },
        other => ClientError::UnexpectedReply(other.msg_type()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{ErrorKind, IsReadyResp, LookupResp, MsgType, RegisterResp};

    #[test]
    fn test_register_carries_endpoint() {
        let ep = Endpoint::new("pub1", "10.0.0.1", 7000);
        match register(Role::Publisher, &ep, &["temp".into()]) {
            Message::Register(req) => {
                assert_eq!(req.endpoint(), ep);
                assert_eq!(req.topics, vec!["temp".to_string()]);
                assert!(req.chain.is_empty());
                assert!(req.ring_params.is_none());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_interpreters() {
        assert!(register_result(Message::RegisterResp(RegisterResp::success())).is_ok());
        assert!(matches!(
            register_result(Message::RegisterResp(RegisterResp::failure("dup"))),
            Err(ClientError::Rejected(r)) if r == "dup"
        ));
        assert!(ready_result(Message::IsReadyResp(IsReadyResp {
            ready: true,
            ..Default::default()
        }))
        .unwrap());
        assert!(lookup_result(Message::LookupResp(LookupResp::default()))
            .unwrap()
            .is_empty());
        assert!(ack_result(Message::Ack).is_ok());
    }

    #[test]
    fn test_wrong_reply_kind() {
        assert!(matches!(
            ready_result(Message::Ack),
            Err(ClientError::UnexpectedReply(MsgType::Ack))
        ));
        assert!(matches!(
            lookup_result(Message::error(ErrorKind::RoutingFailure, "down")),
            Err(ClientError::Server {
                kind: ErrorKind::RoutingFailure,
                ..
            })
        ));
    }
}
