//! Static-registry tools: `calculate`, `current_datetime`, `internet_search`.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};

use serde_json::Value;

use crate::tool::{Tool, ToolContext, ToolOutcome};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// calculate
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CalculateTool;

#[async_trait::async_trait]
impl Tool for CalculateTool {
    fn name(&self) -> &str {
        "calculate"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression (+ - * / % ^, parentheses)."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expr": { "type": "string", "description": "Expression to evaluate, e.g. '2+2'" }
            },
            "required": ["expr"]
        })
    }

    async fn execute(&self, _ctx: &ToolContext, args: Value) -> ToolOutcome {
        let expr = args["expr"].as_str().unwrap_or_default();
        match eval_expression(expr) {
            Ok(value) => ToolOutcome::ok(format_number(value)),
            Err(e) => ToolOutcome::error(format!("Error: {e}")),
        }
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{value}")
    }
}

/// Recursive-descent evaluator over a token stream.
/// Grammar: expr := term (('+'|'-') term)* ; term := factor (('*'|'/'|'%') factor)* ;
/// factor := '-' factor | atom ('^' factor)? ; atom := number | '(' expr ')'.
fn eval_expression(input: &str) -> Result<f64, String> {
    let mut parser = Parser {
        tokens: tokenize(input)?,
        pos: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err(format!("unexpected trailing input at token {}", parser.pos));
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '^' => {
                chars.next();
                tokens.push(Token::Caret);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            c if c.is_ascii_digit() || c == '.' => {
                let mut literal = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        literal.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let value: f64 = literal
                    .parse()
                    .map_err(|_| format!("bad number '{literal}'"))?;
                tokens.push(Token::Number(value));
            }
            c => return Err(format!("unexpected character '{c}'")),
        }
    }
    if tokens.is_empty() {
        return Err("empty expression".into());
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expr(&mut self) -> Result<f64, String> {
        let mut value = self.term()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Plus => {
                    self.next();
                    value += self.term()?;
                }
                Token::Minus => {
                    self.next();
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, String> {
        let mut value = self.factor()?;
        while let Some(op) = self.peek().cloned() {
            match op {
                Token::Star => {
                    self.next();
                    value *= self.factor()?;
                }
                Token::Slash => {
                    self.next();
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err("division by zero".into());
                    }
                    value /= divisor;
                }
                Token::Percent => {
                    self.next();
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err("modulo by zero".into());
                    }
                    value %= divisor;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn factor(&mut self) -> Result<f64, String> {
        if self.peek() == Some(&Token::Minus) {
            self.next();
            return Ok(-self.factor()?);
        }
        let base = self.atom()?;
        if self.peek() == Some(&Token::Caret) {
            self.next();
            let exponent = self.factor()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<f64, String> {
        match self.next() {
            Some(Token::Number(value)) => Ok(value),
            Some(Token::LParen) => {
                let value = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(value),
                    _ => Err("missing closing parenthesis".into()),
                }
            }
            other => Err(format!("expected number or '(', got {other:?}")),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// current_datetime
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct CurrentDatetimeTool;

#[async_trait::async_trait]
impl Tool for CurrentDatetimeTool {
    fn name(&self) -> &str {
        "current_datetime"
    }

    fn description(&self) -> &str {
        "Get the current date and time (UTC, RFC 3339)."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({ "type": "object", "properties": {} })
    }

    async fn execute(&self, _ctx: &ToolContext, _args: Value) -> ToolOutcome {
        ToolOutcome::ok(chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// internet_search
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

const SEARCH_ENDPOINT: &str = "https://html.duckduckgo.com/html/";
const SEARCH_RESULT_CAP: usize = 5;

pub struct InternetSearchTool {
    http: reqwest::Client,
    endpoint: String,
}

impl InternetSearchTool {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .user_agent("wick-agent/0.1")
                .build()
                .unwrap_or_default(),
            // Operators may point searches at a SearXNG-style instance.
            endpoint: std::env::var("WICK_SEARCH_ENDPOINT")
                .unwrap_or_else(|_| SEARCH_ENDPOINT.into()),
        }
    }
}

impl Default for InternetSearchTool {
    fn default() -> Self {
        Self::new()
    }
}

// ── SSRF guard ─────────────────────────────────────────────────────

/// Returns `true` if the given IP address belongs to a private, loopback,
/// link-local, or otherwise non-public network range.
fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()                      // 127.0.0.0/8
                || v4.is_private()                // 10/8, 172.16/12, 192.168/16
                || v4.is_link_local()             // 169.254.0.0/16
                || v4.is_broadcast()              // 255.255.255.255
                || v4.is_unspecified()            // 0.0.0.0
                || is_v4_shared_address(v4)       // 100.64.0.0/10 (CGNAT)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()                      // ::1
                || v6.is_unspecified()            // ::
                || is_v6_unique_local(v6)         // fc00::/7
                || is_v6_link_local(v6)           // fe80::/10
        }
    }
}

/// 100.64.0.0/10 — Shared address space (RFC 6598 / CGNAT).
fn is_v4_shared_address(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    octets[0] == 100 && (octets[1] & 0xC0) == 64
}

/// Unique-local addresses: fc00::/7.
fn is_v6_unique_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xFE00) == 0xFC00
}

/// Link-local addresses: fe80::/10.
fn is_v6_link_local(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xFFC0) == 0xFE80
}

/// Validate the search endpoint before a request goes out.
///
/// Rejects non-http(s) schemes and hosts that resolve to a non-public
/// address, so a misconfigured endpoint cannot reach internal services.
fn validate_search_endpoint(raw: &str) -> Result<reqwest::Url, String> {
    let url = reqwest::Url::parse(raw).map_err(|e| format!("bad search endpoint: {e}"))?;

    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("search endpoint scheme '{other}' is not allowed")),
    }

    let host = url
        .host_str()
        .ok_or_else(|| "search endpoint has no host".to_string())?;
    let port = url.port_or_known_default().unwrap_or(443);

    let addrs = (host, port)
        .to_socket_addrs()
        .map_err(|e| format!("cannot resolve search endpoint host '{host}': {e}"))?;
    for addr in addrs {
        if is_private_ip(&addr.ip()) {
            return Err(format!(
                "search endpoint host '{host}' resolves to a non-public address"
            ));
        }
    }

    Ok(url)
}

#[async_trait::async_trait]
impl Tool for InternetSearchTool {
    fn name(&self) -> &str {
        "internet_search"
    }

    fn description(&self) -> &str {
        "Search the web and return the top results with links."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string", "description": "Search query" }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, ctx: &ToolContext, args: Value) -> ToolOutcome {
        if ctx.cancel.is_cancelled() {
            return ToolOutcome::error("Error: turn cancelled.");
        }
        let endpoint = match validate_search_endpoint(&self.endpoint) {
            Ok(url) => url,
            Err(e) => return ToolOutcome::error(format!("Error: {e}")),
        };
        let query = args["query"].as_str().unwrap_or_default();
        let response = self
            .http
            .get(endpoint)
            .query(&[("q", query)])
            .send()
            .await;

        let body = match response {
            Ok(r) if r.status().is_success() => match r.text().await {
                Ok(b) => b,
                Err(e) => return ToolOutcome::error(format!("Error: search failed: {e}")),
            },
            Ok(r) => return ToolOutcome::error(format!("Error: search returned {}", r.status())),
            Err(e) => return ToolOutcome::error(format!("Error: search failed: {e}")),
        };

        let results = parse_search_results(&body);
        if results.is_empty() {
            return ToolOutcome::ok("No results.");
        }

        let formatted: Vec<String> = results
            .iter()
            .enumerate()
            .map(|(i, (title, url))| format!("{}. {title}\n   {url}", i + 1))
            .collect();
        ToolOutcome::ok(formatted.join("\n"))
    }
}

/// Pull `(title, url)` pairs out of the DuckDuckGo HTML result page.
fn parse_search_results(html: &str) -> Vec<(String, String)> {
    let link_re = regex::Regex::new(r#"<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)
        .expect("static regex");
    let tag_re = regex::Regex::new(r"<[^>]+>").expect("static regex");

    link_re
        .captures_iter(html)
        .take(SEARCH_RESULT_CAP)
        .map(|cap| {
            let url = cap[1].to_string();
            let title = tag_re.replace_all(&cap[2], "").trim().to_string();
            (title, url)
        })
        .collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn calculate_basic() {
        let ctx = ToolContext::new("t", "u");
        let r = CalculateTool
            .execute(&ctx, serde_json::json!({ "expr": "2+2" }))
            .await;
        assert!(!r.is_error);
        assert_eq!(r.output, "4");
    }

    #[test]
    fn precedence_and_parens() {
        assert_eq!(eval_expression("2+3*4").unwrap(), 14.0);
        assert_eq!(eval_expression("(2+3)*4").unwrap(), 20.0);
        assert_eq!(eval_expression("2^3^2").unwrap(), 512.0); // right-assoc
        assert_eq!(eval_expression("10 % 3").unwrap(), 1.0);
        assert_eq!(eval_expression("-3 + 5").unwrap(), 2.0);
        assert_eq!(eval_expression("1/4").unwrap(), 0.25);
    }

    #[test]
    fn division_by_zero_rejected() {
        assert!(eval_expression("1/0").is_err());
        assert!(eval_expression("5 % 0").is_err());
    }

    #[test]
    fn malformed_expressions_rejected() {
        assert!(eval_expression("").is_err());
        assert!(eval_expression("2+").is_err());
        assert!(eval_expression("(2+3").is_err());
        assert!(eval_expression("2 2").is_err());
        assert!(eval_expression("hello").is_err());
    }

    #[test]
    fn float_formatting() {
        assert_eq!(format_number(4.0), "4");
        assert_eq!(format_number(0.25), "0.25");
        assert_eq!(format_number(-7.0), "-7");
    }

    #[tokio::test]
    async fn datetime_is_rfc3339() {
        let ctx = ToolContext::new("t", "u");
        let r = CurrentDatetimeTool.execute(&ctx, serde_json::json!({})).await;
        assert!(!r.is_error);
        assert!(chrono::DateTime::parse_from_rfc3339(&r.output).is_ok());
    }

    #[test]
    fn search_results_parsed_from_html() {
        let html = r#"
            <a rel="nofollow" class="result__a" href="https://example.com/a">First <b>Result</b></a>
            <a rel="nofollow" class="result__a" href="https://example.com/b">Second</a>
        "#;
        let results = parse_search_results(html);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], ("First Result".to_string(), "https://example.com/a".to_string()));
    }

    #[test]
    fn search_results_capped() {
        let mut html = String::new();
        for i in 0..10 {
            html.push_str(&format!(
                r#"<a class="result__a" href="https://example.com/{i}">r{i}</a>"#
            ));
        }
        assert_eq!(parse_search_results(&html).len(), SEARCH_RESULT_CAP);
    }

    #[test]
    fn private_ranges_detected() {
        for ip in ["127.0.0.1", "10.1.2.3", "172.16.0.9", "192.168.1.1", "169.254.0.5", "100.64.0.1", "0.0.0.0"] {
            let ip: IpAddr = ip.parse().unwrap();
            assert!(is_private_ip(&ip), "{ip} should be private");
        }
        for ip in ["93.184.216.34", "8.8.8.8", "2606:4700::1111"] {
            let ip: IpAddr = ip.parse().unwrap();
            assert!(!is_private_ip(&ip), "{ip} should be public");
        }
        let ula: IpAddr = "fd00::1".parse().unwrap();
        assert!(is_private_ip(&ula));
        let link_local: IpAddr = "fe80::1".parse().unwrap();
        assert!(is_private_ip(&link_local));
    }

    #[test]
    fn endpoint_guard_rejects_bad_schemes_and_private_hosts() {
        // IP-literal hosts resolve without DNS.
        assert!(validate_search_endpoint("file:///etc/passwd").is_err());
        assert!(validate_search_endpoint("ftp://example.com/").is_err());
        assert!(validate_search_endpoint("http://127.0.0.1:8080/search").is_err());
        assert!(validate_search_endpoint("http://10.0.0.7/search").is_err());
        assert!(validate_search_endpoint("http://[::1]/search").is_err());
        assert!(validate_search_endpoint("not a url").is_err());

        assert!(validate_search_endpoint("https://93.184.216.34/search").is_ok());
    }

    #[tokio::test]
    async fn search_refuses_private_endpoint() {
        let tool = InternetSearchTool {
            http: reqwest::Client::new(),
            endpoint: "http://127.0.0.1:9/html/".into(),
        };
        let ctx = ToolContext::new("t", "u");
        let r = tool
            .execute(&ctx, serde_json::json!({ "query": "anything" }))
            .await;
        assert!(r.is_error);
        assert!(r.output.contains("non-public address"));
    }
}
