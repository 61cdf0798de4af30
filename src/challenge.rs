//! `WWW-Authenticate` challenge parsing.
//!
//! Each header value carries one or more comma-separated challenges following the
//! RFC 7235 grammar: an auth scheme, optionally followed by either a single token68
//! blob or a list of `name=value` auth-params (values may be tokens or quoted
//! strings). Parsing is all-or-nothing across every header line supplied to one call:
//! a failure on any line discards the challenges of every other line, while the
//! returned [`ChallengeParseError`] still lists each failing line separately.

// crates.io
use oauth2::http::{HeaderMap, header::WWW_AUTHENTICATE};
// self
use crate::_prelude::*;

/// A single authentication challenge.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
	/// Authentication scheme, as sent by the server.
	pub scheme: String,
	/// Auth-params with quoted values already unescaped.
	pub parameters: HashMap<String, String>,
	/// Token68 credentials in header order.
	pub values: Vec<String>,
}
impl Challenge {
	/// Looks up a parameter by name, ignoring ASCII case.
	pub fn parameter(&self, name: &str) -> Option<&str> {
		self.parameters
			.iter()
			.find(|(key, _)| key.eq_ignore_ascii_case(name))
			.map(|(_, value)| value.as_str())
	}

	/// Returns true if the scheme matches, ignoring ASCII case.
	pub fn is_scheme(&self, scheme: &str) -> bool {
		self.scheme.eq_ignore_ascii_case(scheme)
	}
}

/// Failure to parse one header line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChallengeFailure {
	/// Zero-based index of the header line.
	pub header: usize,
	/// Description of the grammar violation.
	pub reason: String,
}
impl Display for ChallengeFailure {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		write!(f, "header {}: {}", self.header, self.reason)
	}
}

/// Every line-level failure collected during one parse call.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ChallengeFailures(pub Vec<ChallengeFailure>);
impl Display for ChallengeFailures {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		for (i, failure) in self.0.iter().enumerate() {
			if i > 0 {
				f.write_str("; ")?;
			}

			Display::fmt(failure, f)?;
		}

		Ok(())
	}
}

/// Error returned when any header line violates the challenge grammar.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
#[error("Challenge parsing failed: {failures}.")]
pub struct ChallengeParseError {
	/// Individual failures in header order.
	pub failures: ChallengeFailures,
}

/// Parses challenge header values in iteration order.
///
/// Blank values contribute no challenges.
pub fn parse<I, S>(values: I) -> Result<Vec<Challenge>, ChallengeParseError>
where
	I: IntoIterator<Item = S>,
	S: AsRef<str>,
{
	let mut challenges = Vec::new();
	let mut failures = Vec::new();

	for (header, value) in values.into_iter().enumerate() {
		match parse_line(value.as_ref()) {
			Ok(parsed) => challenges.extend(parsed),
			Err(reason) => failures.push(ChallengeFailure { header, reason }),
		}
	}

	finish(challenges, failures)
}

/// Parses every `WWW-Authenticate` value in a header map.
///
/// Values that are not valid UTF-8 count as line failures.
pub fn parse_headers(headers: &HeaderMap) -> Result<Vec<Challenge>, ChallengeParseError> {
	let mut challenges = Vec::new();
	let mut failures = Vec::new();

	for (header, value) in headers.get_all(WWW_AUTHENTICATE).iter().enumerate() {
		let parsed = value
			.to_str()
			.map_err(|_| "value is not valid UTF-8".to_owned())
			.and_then(parse_line);

		match parsed {
			Ok(parsed) => challenges.extend(parsed),
			Err(reason) => failures.push(ChallengeFailure { header, reason }),
		}
	}

	finish(challenges, failures)
}

fn finish(
	challenges: Vec<Challenge>,
	failures: Vec<ChallengeFailure>,
) -> Result<Vec<Challenge>, ChallengeParseError> {
	if failures.is_empty() {
		Ok(challenges)
	} else {
		Err(ChallengeParseError { failures: ChallengeFailures(failures) })
	}
}

fn parse_line(input: &str) -> Result<Vec<Challenge>, String> {
	let mut cursor = Cursor { input, pos: 0 };
	let mut challenges = Vec::new();

	loop {
		cursor.skip_list_separators();

		if cursor.is_eof() {
			break;
		}

		let Some(scheme) = cursor.token() else {
			return Err(cursor.unexpected("an auth scheme"));
		};
		let mut challenge = Challenge { scheme: scheme.to_owned(), ..Default::default() };

		cursor.skip_ws();

		if !cursor.is_eof() && cursor.peek() != Some(',') {
			if let Some((name, value)) = cursor.auth_param()? {
				challenge.parameters.insert(name, value);
				cursor.auth_param_tail(&mut challenge)?;
			} else if let Some(token68) = cursor.token68() {
				challenge.values.push(token68.to_owned());
			} else {
				return Err(cursor.unexpected("an auth-param or token68"));
			}
		}

		challenges.push(challenge);
	}

	Ok(challenges)
}

struct Cursor<'a> {
	input: &'a str,
	pos: usize,
}
impl<'a> Cursor<'a> {
	fn is_eof(&self) -> bool {
		self.pos >= self.input.len()
	}

	fn peek(&self) -> Option<char> {
		self.input[self.pos..].chars().next()
	}

	fn bump(&mut self) -> Option<char> {
		let c = self.peek()?;

		self.pos += c.len_utf8();

		Some(c)
	}

	fn skip_ws(&mut self) {
		while matches!(self.peek(), Some(' ' | '\t')) {
			self.pos += 1;
		}
	}

	fn skip_list_separators(&mut self) {
		while matches!(self.peek(), Some(' ' | '\t' | ',')) {
			self.pos += 1;
		}
	}

	fn take_while(&mut self, accept: impl Fn(char) -> bool) -> &'a str {
		let start = self.pos;

		while self.peek().is_some_and(&accept) {
			self.bump();
		}

		&self.input[start..self.pos]
	}

	fn token(&mut self) -> Option<&'a str> {
		Some(self.take_while(is_tchar)).filter(|token| !token.is_empty())
	}

	/// Consumes `token BWS "=" BWS ( token / quoted-string )`, rewinding when the input
	/// is not an auth-param.
	fn auth_param(&mut self) -> Result<Option<(String, String)>, String> {
		let start = self.pos;
		let Some(name) = self.token() else {
			return Ok(None);
		};

		self.skip_ws();

		if self.peek() != Some('=') {
			self.pos = start;

			return Ok(None);
		}

		self.pos += 1;
		self.skip_ws();

		if self.peek() == Some('"') {
			let value = self.quoted_string()?;

			return Ok(Some((name.to_owned(), value)));
		}
		if let Some(value) = self.token() {
			return Ok(Some((name.to_owned(), value.to_owned())));
		}

		// `name=` with no value is token68 padding.
		self.pos = start;

		Ok(None)
	}

	/// Consumes further `, auth-param` items until the next challenge or end of input.
	fn auth_param_tail(&mut self, challenge: &mut Challenge) -> Result<(), String> {
		loop {
			let before = self.pos;

			self.skip_ws();

			if self.is_eof() {
				return Ok(());
			}
			if self.peek() != Some(',') {
				return Err(self.unexpected("`,` between auth-params"));
			}

			self.skip_list_separators();

			if self.is_eof() {
				return Ok(());
			}

			match self.auth_param()? {
				Some((name, value)) => {
					challenge.parameters.insert(name, value);
				},
				None => {
					// Next challenge begins here; leave the separator for the outer loop.
					self.pos = before;

					return Ok(());
				},
			}
		}
	}

	/// Consumes a token68 blob only if it ends the challenge.
	fn token68(&mut self) -> Option<&'a str> {
		let start = self.pos;
		let body = self.take_while(is_token68_char);

		if body.is_empty() {
			self.pos = start;

			return None;
		}

		self.take_while(|c| c == '=');

		let end = self.pos;

		self.skip_ws();

		if self.is_eof() || self.peek() == Some(',') {
			Some(&self.input[start..end])
		} else {
			self.pos = start;

			None
		}
	}

	fn quoted_string(&mut self) -> Result<String, String> {
		let open = self.pos;
		let mut value = String::new();

		self.pos += 1;

		loop {
			match self.bump() {
				Some('"') => return Ok(value),
				Some('\\') => match self.bump() {
					Some(escaped) => value.push(escaped),
					None => return Err(format!("dangling escape in quoted string at offset {open}")),
				},
				Some(c) => value.push(c),
				None => return Err(format!("unterminated quoted string at offset {open}")),
			}
		}
	}

	fn unexpected(&self, expected: &str) -> String {
		match self.peek() {
			Some(c) => format!("expected {expected} at offset {}, found `{c}`", self.pos),
			None => format!("expected {expected} at end of input"),
		}
	}
}

fn is_tchar(c: char) -> bool {
	c.is_ascii_alphanumeric() || "!#$%&'*+-.^_`|~".contains(c)
}

fn is_token68_char(c: char) -> bool {
	c.is_ascii_alphanumeric() || "-._~+/".contains(c)
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	const DIGEST_SHA256: &str = r#"Digest realm="http-auth@example.org", qop="auth, auth-int", algorithm=SHA-256, nonce="7ypf/xlj9XXwfDPEoM4URrv/xwf94BcCAzFZH4GiTo0v", opaque="FQhe/qaU925kfnzjCev0ciny7QMkPqMAFRtzCUYo5tdS""#;
	const DIGEST_MD5: &str = r#"Digest realm="http-auth@example.org", qop="auth, auth-int", algorithm=MD5, nonce="7ypf/xlj9XXwfDPEoM4URrv/xwf94BcCAzFZH4GiTo0v", opaque="FQhe/qaU925kfnzjCev0ciny7QMkPqMAFRtzCUYo5tdS""#;

	fn challenge(scheme: &str, params: &[(&str, &str)]) -> Challenge {
		Challenge {
			scheme: scheme.into(),
			parameters: params.iter().map(|(k, v)| ((*k).into(), (*v).into())).collect(),
			values: Vec::new(),
		}
	}

	fn digest(algorithm: &str) -> Challenge {
		challenge(
			"Digest",
			&[
				("realm", "http-auth@example.org"),
				("qop", "auth, auth-int"),
				("algorithm", algorithm),
				("nonce", "7ypf/xlj9XXwfDPEoM4URrv/xwf94BcCAzFZH4GiTo0v"),
				("opaque", "FQhe/qaU925kfnzjCev0ciny7QMkPqMAFRtzCUYo5tdS"),
			],
		)
	}

	#[test]
	fn empty_input_yields_nothing() {
		let parsed = parse(Vec::<String>::new()).expect("Empty input should parse.");

		assert!(parsed.is_empty());

		let parsed = parse(["", "  "]).expect("Blank lines should parse.");

		assert!(parsed.is_empty());
	}

	#[test]
	fn scheme_without_parameters() {
		let parsed = parse(["Basic"]).expect("Bare scheme should parse.");

		assert_eq!(parsed, vec![challenge("Basic", &[])]);
	}

	#[test]
	fn scheme_with_quoted_parameters() {
		let parsed = parse([r#"Basic realm="Dev", charset="UTF-8""#])
			.expect("Quoted parameters should parse.");

		assert_eq!(parsed, vec![challenge("Basic", &[("realm", "Dev"), ("charset", "UTF-8")])]);
	}

	#[test]
	fn quoted_commas_and_unquoted_tokens() {
		let parsed = parse([DIGEST_SHA256]).expect("Digest challenge should parse.");

		assert_eq!(parsed, vec![digest("SHA-256")]);
	}

	#[test]
	fn same_scheme_across_header_lines_preserves_order() {
		let parsed = parse([DIGEST_SHA256, DIGEST_MD5]).expect("Both header lines should parse.");

		assert_eq!(parsed, vec![digest("SHA-256"), digest("MD5")]);
	}

	#[test]
	fn multiple_schemes_in_one_line_unescape_quotes() {
		let parsed =
			parse([r#"Basic realm="simple", Newauth realm="apps", type=1, title="Login to \"apps\"""#])
				.expect("Multiple challenges should parse.");

		assert_eq!(
			parsed,
			vec![
				challenge("Basic", &[("realm", "simple")]),
				challenge(
					"Newauth",
					&[("realm", "apps"), ("type", "1"), ("title", r#"Login to "apps""#)]
				),
			]
		);
	}

	#[test]
	fn token68_and_quoted_equals() {
		let parsed = parse([r#"Negotiate YII+/xA==, Bearer authorization="https://login/a=b", scope="x""#])
			.expect("Token68 followed by a challenge should parse.");

		assert_eq!(parsed.len(), 2);
		assert_eq!(parsed[0].scheme, "Negotiate");
		assert_eq!(parsed[0].values, vec!["YII+/xA==".to_owned()]);
		assert!(parsed[0].parameters.is_empty());
		assert_eq!(parsed[1].parameter("AUTHORIZATION"), Some("https://login/a=b"));
		assert_eq!(parsed[1].parameter("scope"), Some("x"));
	}

	#[test]
	fn failures_are_aggregated_and_discard_everything() {
		let err = parse(["Basic", r#"Bearer realm="open"#, "Basic", r#"Digest a="x\"#])
			.expect_err("Malformed lines should fail the call.");

		assert_eq!(err.failures.0.len(), 2);
		assert_eq!(err.failures.0[0].header, 1);
		assert_eq!(err.failures.0[1].header, 3);
		assert!(err.to_string().starts_with("Challenge parsing failed: header 1: "));
		assert!(err.to_string().contains("; header 3: "));
	}

	#[test]
	fn rejects_malformed_grammar() {
		assert!(parse([r#""quoted" realm=x"#]).is_err());
		assert!(parse(["Basic realm=x y"]).is_err());
		assert!(parse(["Basic @"]).is_err());
	}

	#[test]
	fn header_map_values_are_read_in_order() {
		let mut headers = HeaderMap::new();

		headers.append(WWW_AUTHENTICATE, "Basic realm=\"one\"".parse().expect("Header should parse."));
		headers.append(WWW_AUTHENTICATE, "Bearer realm=\"two\"".parse().expect("Header should parse."));

		let parsed = parse_headers(&headers).expect("Header map should parse.");

		assert_eq!(parsed.len(), 2);
		assert!(parsed[0].is_scheme("basic"));
		assert_eq!(parsed[1].parameter("realm"), Some("two"));
	}
}
