// crates.io
use httpmock::prelude::*;
use msi_dataplane::reqwest::{
	Method,
	header::{ACCEPT, CONTENT_TYPE},
};
// self
use msi_dataplane::{
	_preludet::*,
	error::TransportError,
	http::{Request, Transport},
};

fn post(url: String, body: &str) -> Request {
	let mut request = Request::new(body.as_bytes().to_vec());

	*request.method_mut() = Method::POST;
	*request.uri_mut() = url.parse().expect("Mock URL should parse.");
	request.headers_mut().insert(ACCEPT, "application/json".parse().expect("Header should parse."));
	request
		.headers_mut()
		.insert(CONTENT_TYPE, "application/json".parse().expect("Header should parse."));

	request
}

#[tokio::test]
async fn sends_request_and_returns_any_status() {
	let server = MockServer::start_async().await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/credentials")
				.query_param("api-version", "2024-01-01")
				.header("accept", "application/json")
				.body("{\"identityIds\":[]}");
			then.status(401)
				.header("www-authenticate", "Bearer authorization=\"https://login.example/tenant\"")
				.body("denied");
		})
		.await;
	let response = test_reqwest_http_client()
		.send(post(server.url("/credentials?api-version=2024-01-01"), "{\"identityIds\":[]}"))
		.await
		.expect("Transport should return non-success responses.");

	assert_eq!(response.status(), 401);
	assert_eq!(
		response.headers()["www-authenticate"],
		"Bearer authorization=\"https://login.example/tenant\""
	);
	assert_eq!(response.body(), b"denied");

	mock.assert_async().await;
}

#[tokio::test]
async fn connection_failures_are_transport_errors() {
	let port = {
		let listener =
			std::net::TcpListener::bind("127.0.0.1:0").expect("Ephemeral port should bind.");

		listener.local_addr().expect("Listener should have an address.").port()
	};
	let err = test_reqwest_http_client()
		.send(post(format!("http://127.0.0.1:{port}/gone"), "{}"))
		.await
		.expect_err("Closed port should fail.");

	assert!(matches!(err, TransportError::Network { .. }));
}
