use reqwest::Url;
use uuid::Uuid;

/// Base used to read query-only input such as `?invite=abc`.
const RELATIVE_BASE: &str = "http://localhost/";

/// Random 8-character invite code. Collisions are not checked.
pub fn generate_invite_code() -> String {
    let id = Uuid::new_v4();
    hex::encode(&id.as_bytes()[..4])
}

pub fn invite_link(base_url: &str, code: &str) -> String {
    format!("{}?invite={code}", base_url.trim_end_matches('?'))
}

/// Extract an invite code from either a bare code or a link carrying an
/// `invite` query parameter. Percent-encoded values are decoded.
pub fn parse_invite(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    if input.contains('?') {
        let url = Url::parse(input)
            .or_else(|_| Url::parse(RELATIVE_BASE).and_then(|base| base.join(input)));
        let code = url.ok().and_then(|url| {
            url.query_pairs()
                .find(|(key, _)| key == "invite")
                .map(|(_, code)| code.into_owned())
        });
        return code.filter(|code| !code.is_empty());
    }

    if input.contains(['/', '=']) {
        return None;
    }
    Some(input.to_string())
}
