//! Observation extraction from proxied DNS exchanges
//!
//! The proxy never interprets the bytes it forwards. A copy of each exchange
//! is parsed here, off the data plane, to lift A/AAAA answers into
//! [`ResolvedRecord`]s for the governor. Parse failures simply produce no
//! observations; the client still gets the upstream's verbatim response.

use hickory_proto::op::{Message, OpCode};
use hickory_proto::rr::{RData, RecordType};

use super::types::ResolvedRecord;

/// Floor applied to answer TTLs at emission
///
/// Very short authoritative TTLs would otherwise churn the downstream
/// caches faster than probes can keep up.
pub const MIN_OBSERVED_TTL: u32 = 90;

/// Extract observation records from a query/response pair
///
/// Only standard queries are observed. The emitted FQDN is the name of the
/// query's first A or AAAA question, so answers reached through a CNAME
/// chain are attributed to the name the client asked for.
#[must_use]
pub fn extract_observations(query: &Message, response: &Message) -> Vec<ResolvedRecord> {
    if query.op_code() != OpCode::Query {
        return Vec::new();
    }

    let Some(fqdn) = question_fqdn(query) else {
        return Vec::new();
    };

    let mut out = Vec::new();
    for record in response.answers() {
        let ttl = record.ttl().max(MIN_OBSERVED_TTL);
        match record.data() {
            Some(RData::A(a)) => {
                out.push(ResolvedRecord::new(fqdn.clone(), a.0.into(), ttl));
            }
            Some(RData::AAAA(aaaa)) => {
                out.push(ResolvedRecord::new(fqdn.clone(), aaaa.0.into(), ttl));
            }
            _ => {}
        }
    }

    out
}

/// Name of the first A/AAAA question, normalized to a lowercase FQDN
fn question_fqdn(query: &Message) -> Option<String> {
    query
        .queries()
        .iter()
        .find(|q| matches!(q.query_type(), RecordType::A | RecordType::AAAA))
        .map(|q| {
            let mut name = q.name().to_ascii().to_lowercase();
            if !name.ends_with('.') {
                name.push('.');
            }
            name
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::types::IpFamily;
    use hickory_proto::op::{MessageType, Query};
    use hickory_proto::rr::rdata::{A, AAAA, CNAME};
    use hickory_proto::rr::{Name, Record};
    use std::str::FromStr;

    fn query_for(name: &str, rtype: RecordType) -> Message {
        let mut msg = Message::new();
        msg.set_id(0x1234);
        msg.set_message_type(MessageType::Query);
        msg.set_op_code(OpCode::Query);
        msg.add_query(Query::query(Name::from_str(name).unwrap(), rtype));
        msg
    }

    fn answer_a(name: &str, ttl: u32, ip: [u8; 4]) -> Record {
        Record::from_rdata(
            Name::from_str(name).unwrap(),
            ttl,
            RData::A(A(ip.into())),
        )
    }

    #[test]
    fn extracts_a_answer_with_ttl_floor() {
        let query = query_for("www.example.com.", RecordType::A);
        let mut response = Message::new();
        response.add_answer(answer_a("www.example.com.", 30, [1, 2, 3, 4]));

        let records = extract_observations(&query, &response);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].fqdn, "www.example.com.");
        assert_eq!(records[0].family, IpFamily::V4);
        assert_eq!(records[0].ip, "1.2.3.4".parse::<std::net::IpAddr>().unwrap());
        assert_eq!(records[0].ttl_secs, MIN_OBSERVED_TTL);
    }

    #[test]
    fn long_ttl_is_kept() {
        let query = query_for("www.example.com.", RecordType::A);
        let mut response = Message::new();
        response.add_answer(answer_a("www.example.com.", 3600, [1, 2, 3, 4]));

        let records = extract_observations(&query, &response);
        assert_eq!(records[0].ttl_secs, 3600);
    }

    #[test]
    fn aaaa_answers_are_v6() {
        let query = query_for("www.example.com.", RecordType::AAAA);
        let mut response = Message::new();
        response.add_answer(Record::from_rdata(
            Name::from_str("www.example.com.").unwrap(),
            300,
            RData::AAAA(AAAA("2001:db8::1".parse().unwrap())),
        ));

        let records = extract_observations(&query, &response);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].family, IpFamily::V6);
    }

    #[test]
    fn cname_chain_surfaces_under_query_name() {
        let query = query_for("www.example.com.", RecordType::A);
        let mut response = Message::new();
        response.add_answer(Record::from_rdata(
            Name::from_str("www.example.com.").unwrap(),
            300,
            RData::CNAME(CNAME(Name::from_str("cdn.example.net.").unwrap())),
        ));
        response.add_answer(answer_a("cdn.example.net.", 300, [5, 6, 7, 8]));

        let records = extract_observations(&query, &response);
        assert_eq!(records.len(), 1);
        // attributed to the queried name, not the answer's owner
        assert_eq!(records[0].fqdn, "www.example.com.");
    }

    #[test]
    fn non_query_opcodes_are_ignored() {
        let mut query = query_for("www.example.com.", RecordType::A);
        query.set_op_code(OpCode::Notify);
        let mut response = Message::new();
        response.add_answer(answer_a("www.example.com.", 300, [1, 2, 3, 4]));

        assert!(extract_observations(&query, &response).is_empty());
    }

    #[test]
    fn non_address_questions_are_ignored() {
        let query = query_for("www.example.com.", RecordType::MX);
        let mut response = Message::new();
        response.add_answer(answer_a("www.example.com.", 300, [1, 2, 3, 4]));

        assert!(extract_observations(&query, &response).is_empty());
    }

    #[test]
    fn query_name_is_normalized() {
        let query = query_for("WWW.Example.COM.", RecordType::A);
        let mut response = Message::new();
        response.add_answer(answer_a("www.example.com.", 300, [1, 2, 3, 4]));

        let records = extract_observations(&query, &response);
        assert_eq!(records[0].fqdn, "www.example.com.");
    }
}
