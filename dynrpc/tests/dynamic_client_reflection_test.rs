use dynrpc::{
    CallError, CallInput, CallOptions, CallResponse, CatalogError, DynamicClient,
    StreamingShape, StructuralParseError,
};
use futures_util::StreamExt;
use greeter_service::{DependenciesGreeterServer, FILE_DESCRIPTOR_SET, GreeterServer};
use greeter_service_impl::{
    DependenciesGreeterImpl, END_OF_STREAM, GREETING_HEADER, GreeterImpl, RecordingGreeter,
};
use prost_reflect::ReflectMessage;
use serde_json::json;
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};
use std::time::Duration;
use tonic::service::Routes;


fn setup_client() -> DynamicClient<Routes> {
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .unwrap();

    let service = Routes::new(reflection_service)
        .add_service(GreeterServer::new(GreeterImpl))
        .add_service(DependenciesGreeterServer::new(DependenciesGreeterImpl));

    DynamicClient::from_service(service)
}

fn setup_recording_client() -> (DynamicClient<Routes>, RecordingGreeter) {
    let reflection_service = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()
        .unwrap();

    let recorder = RecordingGreeter::default();
    let service =
        Routes::new(reflection_service).add_service(GreeterServer::new(recorder.clone()));

    (DynamicClient::from_service(service), recorder)
}

async fn collect_records(
    stream: dynrpc::ResponseStream,
) -> Vec<Result<serde_json::Value, CallError>> {
    stream
        .map(|reply| reply.map(|r| r.into_record().unwrap()))
        .collect()
        .await
}

#[tokio::test]
async fn test_service_names() {
    let mut client = setup_client();

    let services = client.service_names().await.unwrap();

    assert!(services.contains(&"helloworld.Greeter".to_string()));
    assert!(services.contains(&"dependencies.Greeter".to_string()));
    assert!(services.contains(&"grpc.reflection.v1.ServerReflection".to_string()));
}

#[tokio::test]
async fn test_unary_unary() {
    let mut client = setup_client();

    let reply = client
        .unary_unary(
            "helloworld.Greeter",
            "SayHello",
            json!({ "name": "sinsky" }),
            CallOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(reply.into_record().unwrap(), json!({ "message": "Hello, sinsky!" }));
}

#[tokio::test]
async fn test_unary_stream() {
    let mut client = setup_client();

    let stream = client
        .unary_stream(
            "helloworld.Greeter",
            "SayHelloGroup",
            json!({ "name": "sinskyviridianforgejackharry" }),
            CallOptions::default(),
        )
        .await
        .unwrap();

    let replies: Vec<_> = collect_records(stream)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(
        replies,
        vec![
            json!({ "message": "Hello, sinsky!" }),
            json!({ "message": "Hello, viridianforge!" }),
            json!({ "message": "Hello, jack!" }),
            json!({ "message": "Hello, harry!" }),
        ]
    );
}

#[tokio::test]
async fn test_stream_unary_from_json_array() {
    let mut client = setup_client();

    let reply = client
        .stream_unary(
            "helloworld.Greeter",
            "HelloEveryone",
            json!([{ "name": "sinsky" }, { "name": "jack" }]),
            CallOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        reply.into_record().unwrap(),
        json!({ "message": "Hello, sinsky jack!" })
    );
}

#[tokio::test]
async fn test_stream_unary_from_lazy_stream() {
    let mut client = setup_client();

    let names = futures_util::stream::iter(["sinsky", "jack", "harry"])
        .map(|name| json!({ "name": name }));

    let reply = client
        .stream_unary(
            "helloworld.Greeter",
            "HelloEveryone",
            CallInput::stream(names),
            CallOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        reply.into_record().unwrap(),
        json!({ "message": "Hello, sinsky jack harry!" })
    );
}

#[tokio::test]
async fn test_stream_stream() {
    let mut client = setup_client();

    let stream = client
        .stream_stream(
            "helloworld.Greeter",
            "SayHelloOneByOne",
            vec![json!({ "name": "sinsky" }), json!({ "name": "jack" })],
            CallOptions::default(),
        )
        .await
        .unwrap();

    let replies: Vec<_> = collect_records(stream)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();

    assert_eq!(
        replies,
        vec![
            json!({ "message": "Hello sinsky" }),
            json!({ "message": "Hello jack" }),
        ]
    );
}

#[tokio::test]
async fn test_generic_call_dispatches_on_shape() {
    let mut client = setup_client();

    let response = client
        .call(
            "helloworld.Greeter",
            "SayHello",
            json!({ "name": "jack" }),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert!(matches!(response, CallResponse::Unary(_)));

    let response = client
        .call(
            "helloworld.Greeter",
            "SayHelloGroup",
            json!({ "name": "jack" }),
            CallOptions::default(),
        )
        .await
        .unwrap();
    let stream = response.into_stream().unwrap();
    let replies = collect_records(stream).await;
    assert_eq!(replies.len(), 1);
}

#[tokio::test]
async fn test_unknown_service_lists_known_services() {
    let mut client = setup_client();

    let result = client
        .call(
            "helloworld.Ghost",
            "SayHello",
            json!({ "name": "sinsky" }),
            CallOptions::default(),
        )
        .await;

    match result {
        Err(CallError::Catalog(CatalogError::ServiceNotFound { service, available })) => {
            assert_eq!(service, "helloworld.Ghost");
            assert!(available.contains(&"helloworld.Greeter".to_string()));
            assert!(available.contains(&"dependencies.Greeter".to_string()));
        }
        other => panic!("Expected ServiceNotFound, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_method_lists_known_methods() {
    let mut client = setup_client();

    let result = client
        .check_method_available("helloworld.Greeter", "SayGoodbye", None)
        .await;

    match result {
        Err(CatalogError::MethodNotFound {
            service,
            method,
            available,
        }) => {
            assert_eq!(service, "helloworld.Greeter");
            assert_eq!(method, "SayGoodbye");
            assert_eq!(
                available,
                ["SayHello", "SayHelloGroup", "HelloEveryone", "SayHelloOneByOne"]
            );
        }
        other => panic!("Expected MethodNotFound, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_unknown_field_fails_before_dispatch() {
    let mut client = setup_client();

    let result = client
        .unary_unary(
            "helloworld.Greeter",
            "SayHello",
            json!({ "foo": "bar" }),
            CallOptions::default(),
        )
        .await;

    assert!(matches!(
        result,
        Err(CallError::StructuralParse(StructuralParseError::Mismatch { message_type, .. }))
            if message_type == "helloworld.HelloRequest"
    ));
}

#[tokio::test]
async fn test_streaming_request_fails_at_the_offending_element() {
    let mut client = setup_client();

    let result = client
        .stream_unary(
            "helloworld.Greeter",
            "HelloEveryone",
            json!([{ "name": "sinsky" }, { "foo": "bar" }, { "name": "jack" }]),
            CallOptions::default(),
        )
        .await;

    assert!(matches!(
        result,
        Err(CallError::StructuralParse(StructuralParseError::Mismatch { .. }))
    ));
}

#[tokio::test]
async fn test_bidirectional_request_error_is_reported_in_the_stream() {
    let mut client = setup_client();

    let stream = client
        .stream_stream(
            "helloworld.Greeter",
            "SayHelloOneByOne",
            vec![json!({ "name": "sinsky" }), json!({ "name": 42 })],
            CallOptions::default(),
        )
        .await
        .unwrap();

    let mut replies = collect_records(stream).await.into_iter();

    assert_eq!(
        replies.next().unwrap().unwrap(),
        json!({ "message": "Hello sinsky" })
    );
    assert!(matches!(
        replies.next(),
        Some(Err(CallError::StructuralParse(_)))
    ));
    assert!(replies.next().is_none());
}

#[tokio::test]
async fn test_streaming_request_error_cancels_the_call() {
    let (mut client, recorder) = setup_recording_client();

    let result = client
        .stream_unary(
            "helloworld.Greeter",
            "HelloEveryone",
            json!([{ "name": "sinsky" }, { "foo": "bar" }, { "name": "jack" }]),
            CallOptions::default(),
        )
        .await;

    assert!(matches!(
        result,
        Err(CallError::StructuralParse(StructuralParseError::Mismatch { .. }))
    ));
    // The server never saw the request stream end, so it never committed a reply.
    assert_eq!(recorder.received(), ["sinsky"]);
}

#[tokio::test]
async fn test_complete_request_stream_is_closed_cleanly() {
    let (mut client, recorder) = setup_recording_client();

    client
        .stream_unary(
            "helloworld.Greeter",
            "HelloEveryone",
            json!([{ "name": "sinsky" }, { "name": "jack" }]),
            CallOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(recorder.received(), ["sinsky", "jack", END_OF_STREAM]);
}

#[tokio::test]
async fn test_elements_after_a_rejected_one_are_never_pulled() {
    let mut client = setup_client();

    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = pulled.clone();
    let requests = futures_util::stream::iter([
        json!({ "name": "sinsky" }),
        json!({ "foo": "bar" }),
        json!({ "name": "jack" }),
        json!({ "name": "harry" }),
    ])
    .inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let result = client
        .stream_unary(
            "helloworld.Greeter",
            "HelloEveryone",
            CallInput::stream(requests),
            CallOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(CallError::StructuralParse(_))));
    assert_eq!(pulled.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unbounded_bidirectional_input() {
    let mut client = setup_client();

    let pulled = Arc::new(AtomicUsize::new(0));
    let counter = pulled.clone();
    let requests = futures_util::stream::repeat(json!({ "name": "sinsky" })).inspect(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let mut stream = client
        .stream_stream(
            "helloworld.Greeter",
            "SayHelloOneByOne",
            CallInput::stream(requests),
            CallOptions::default(),
        )
        .await
        .unwrap();

    for _ in 0..5 {
        let reply = stream.next().await.unwrap().unwrap();
        assert_eq!(reply.into_record().unwrap(), json!({ "message": "Hello sinsky" }));
    }

    stream.close();

    assert!(stream.next().await.is_none());
    assert!(pulled.load(Ordering::SeqCst) >= 5);
}

#[tokio::test]
async fn test_message_from_method_descriptor_after_registration() {
    let mut client = setup_client();
    client.register_all_services().await.unwrap();

    let descriptor = client
        .method_descriptor("helloworld.Greeter", "SayHello")
        .unwrap();
    let mut request = prost_reflect::DynamicMessage::new(descriptor.input());
    request.set_field_by_name("name", prost_reflect::Value::String("harry".to_string()));

    let reply = client
        .unary_unary("helloworld.Greeter", "SayHello", request, CallOptions::default())
        .await
        .unwrap();

    assert_eq!(reply.to_value().unwrap(), json!({ "message": "Hello, harry!" }));
}

#[tokio::test]
async fn test_message_of_another_type_is_rejected() {
    let mut client = setup_client();
    client.register_all_services().await.unwrap();

    let descriptor = client
        .method_descriptor("helloworld.Greeter", "SayHello")
        .unwrap();
    let request = prost_reflect::DynamicMessage::new(descriptor.output());

    let result = client
        .unary_unary("helloworld.Greeter", "SayHello", request, CallOptions::default())
        .await;

    assert!(matches!(
        result,
        Err(CallError::StructuralParse(StructuralParseError::WrongMessageType { expected, actual }))
            if expected == "helloworld.HelloRequest" && actual == "helloworld.HelloReply"
    ));
}

#[tokio::test]
async fn test_shape_mismatch_names_both_shapes() {
    let mut client = setup_client();

    let result = client
        .unary_unary(
            "helloworld.Greeter",
            "SayHelloGroup",
            json!({ "name": "sinsky" }),
            CallOptions::default(),
        )
        .await;

    assert!(matches!(
        result,
        Err(CallError::Catalog(CatalogError::ShapeMismatch { expected, actual, .. }))
            if expected == StreamingShape::UnaryUnary && actual == StreamingShape::UnaryStream
    ));
}

#[tokio::test]
async fn test_client_streaming_rejects_a_single_record() {
    let mut client = setup_client();

    let result = client
        .call(
            "helloworld.Greeter",
            "HelloEveryone",
            json!({ "name": "sinsky" }),
            CallOptions::default(),
        )
        .await;

    assert!(matches!(result, Err(CallError::InvalidInput(_))));
}

#[tokio::test]
async fn test_server_status_is_surfaced_unchanged() {
    let mut client = setup_client();

    let result = client
        .unary_unary(
            "helloworld.Greeter",
            "SayHello",
            serde_json::Value::Null,
            CallOptions::default(),
        )
        .await;

    match result {
        Err(CallError::Status(status)) => {
            assert_eq!(status.code(), tonic::Code::InvalidArgument);
            assert_eq!(status.message(), "name is required");
        }
        other => panic!("Expected an InvalidArgument status, got: {:?}", other),
    }
}

#[tokio::test]
async fn test_headers_and_timeout_are_sent() {
    let mut client = setup_client();

    let options = CallOptions::default()
        .with_header(GREETING_HEADER, "Hi")
        .with_timeout(Duration::from_secs(5));

    let reply = client
        .unary_unary(
            "helloworld.Greeter",
            "SayHello",
            json!({ "name": "harry" }),
            options,
        )
        .await
        .unwrap();

    assert_eq!(reply.into_record().unwrap(), json!({ "message": "Hi, harry!" }));
}

#[tokio::test]
async fn test_raw_output() {
    let mut client = setup_client();

    let reply = client
        .unary_unary(
            "helloworld.Greeter",
            "SayHello",
            json!({ "name": "sinsky" }),
            CallOptions::raw(),
        )
        .await
        .unwrap();

    let message = reply.into_raw().unwrap();
    assert_eq!(message.descriptor().full_name(), "helloworld.HelloReply");
    assert_eq!(
        message.get_field_by_name("message").unwrap().as_str(),
        Some("Hello, sinsky!")
    );
}

#[tokio::test]
async fn test_dynamic_message_input() {
    let mut client = setup_client();

    let meta = client
        .method_meta("helloworld.Greeter", "SayHello")
        .await
        .unwrap();

    let mut request = prost_reflect::DynamicMessage::new(meta.input().clone());
    request.set_field_by_name("name", prost_reflect::Value::String("jack".to_string()));

    let reply = client
        .unary_unary("helloworld.Greeter", "SayHello", request, CallOptions::default())
        .await
        .unwrap();

    assert_eq!(reply.to_value().unwrap(), json!({ "message": "Hello, jack!" }));
}

#[tokio::test]
async fn test_every_advertised_method_is_available_after_registration() {
    let mut client = setup_client();

    for service in client.service_names().await.unwrap() {
        let metadata = client.register_service(&service).await.unwrap();

        for method in metadata.method_names() {
            client
                .check_method_available(&service, method, None)
                .await
                .unwrap();
        }
    }

    assert!(client.catalog().is_fully_registered());
}

#[tokio::test]
async fn test_methods_meta() {
    let mut client = setup_client();

    let service = client.methods_meta("helloworld.Greeter").await.unwrap();

    let shapes: Vec<_> = service
        .methods()
        .map(|m| (m.name().to_string(), m.shape()))
        .collect();

    assert_eq!(
        shapes,
        vec![
            ("SayHello".to_string(), StreamingShape::UnaryUnary),
            ("SayHelloGroup".to_string(), StreamingShape::UnaryStream),
            ("HelloEveryone".to_string(), StreamingShape::StreamUnary),
            ("SayHelloOneByOne".to_string(), StreamingShape::StreamStream),
        ]
    );

    let method = service.method("SayHello").unwrap();
    assert_eq!(method.service(), "helloworld.Greeter");
    assert_eq!(method.input().full_name(), "helloworld.HelloRequest");
    assert_eq!(method.output().full_name(), "helloworld.HelloReply");
    assert_eq!(method.handler().path(), "/helloworld.Greeter/SayHello");

    assert!(client.service_descriptor("helloworld.Greeter").is_some());
    assert!(
        client
            .method_descriptor("helloworld.Greeter", "HelloEveryone")
            .unwrap()
            .is_client_streaming()
    );
}

#[tokio::test]
async fn test_methods_meta_of_unknown_service() {
    let mut client = setup_client();

    let result = client.methods_meta("helloworld.Ghost").await;

    assert!(matches!(result, Err(CatalogError::ServiceNotFound { .. })));
}

#[tokio::test]
async fn test_dependencies_are_registered_first() {
    let mut client = setup_client();

    client.register_service("dependencies.Greeter").await.unwrap();

    let order = client.catalog().registry().registration_order();
    let position = |name: &str| order.iter().position(|f| f == name).unwrap();

    assert!(position("dependency1.proto") < position("dependency2.proto"));
    assert!(position("dependency2.proto") < position("dependencies.proto"));

    let reply = client
        .unary_unary(
            "dependencies.Greeter",
            "Greet",
            json!({ "name": "sinsky", "display_name": "Sinsky" }),
            CallOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(
        reply.into_record().unwrap(),
        json!({
            "person": { "name": "sinsky", "display_name": "Sinsky" },
            "text": "Hello, Sinsky!"
        })
    );
}

#[tokio::test]
async fn test_registration_is_idempotent() {
    let mut client = setup_client();

    client.register_service("dependencies.Greeter").await.unwrap();
    let first = client.catalog().registry().registration_order().to_vec();

    client.register_service("dependencies.Greeter").await.unwrap();
    client.register_all_services().await.unwrap();
    client.register_all_services().await.unwrap();

    let order = client.catalog().registry().registration_order();
    assert_eq!(&order[..first.len()], first.as_slice());
    assert_eq!(
        order.iter().filter(|f| *f == "dependencies.proto").count(),
        1
    );
}

#[tokio::test]
async fn test_register_fetched_file_descriptors() {
    let mut client = setup_client();

    let files = client
        .file_descriptors_by_name("dependency2.proto")
        .await
        .unwrap();
    client.register_file_descriptors(files).await.unwrap();

    let registry = client.catalog().registry();
    assert!(registry.is_registered("dependency1.proto"));
    assert!(registry.is_registered("dependency2.proto"));
    assert!(registry.pool().get_message_by_name("dependencies.Greeting").is_some());

    let files = client
        .file_descriptors_by_symbol("helloworld.HelloRequest")
        .await
        .unwrap();
    assert!(files.iter().any(|f| f.name() == "helloworld.proto"));
}

#[tokio::test]
async fn test_service_proxy() {
    let mut client = setup_client();

    let greeter = client.service("helloworld.Greeter").await.unwrap();

    assert_eq!(greeter.name(), "helloworld.Greeter");
    assert_eq!(
        greeter.method_names(),
        ["SayHello", "SayHelloGroup", "HelloEveryone", "SayHelloOneByOne"]
    );

    let reply = greeter
        .call("SayHello", json!({ "name": "sinsky" }), CallOptions::default())
        .await
        .unwrap()
        .into_unary()
        .unwrap();
    assert_eq!(reply.into_record().unwrap(), json!({ "message": "Hello, sinsky!" }));

    let hello_everyone = greeter.method("HelloEveryone").unwrap();
    assert_eq!(hello_everyone.shape(), StreamingShape::StreamUnary);

    let reply = hello_everyone
        .call(json!([{ "name": "jack" }]), CallOptions::default())
        .await
        .unwrap()
        .into_unary()
        .unwrap();
    assert_eq!(reply.into_record().unwrap(), json!({ "message": "Hello, jack!" }));

    let result = greeter
        .call("SayGoodbye", json!({}), CallOptions::default())
        .await;
    assert!(matches!(
        result,
        Err(CallError::Catalog(CatalogError::MethodNotFound { .. }))
    ));
}

#[tokio::test]
async fn test_service_proxy_of_unknown_service() {
    let mut client = setup_client();

    let result = client.service("helloworld.Ghost").await;

    match result {
        Err(CatalogError::ServiceNotFound { available, .. }) => {
            assert!(available.contains(&"helloworld.Greeter".to_string()));
        }
        other => panic!("Expected ServiceNotFound, got: {:?}", other.map(|p| p.name().to_string())),
    }
}

#[tokio::test]
async fn test_stream_can_be_abandoned_early() {
    let mut client = setup_client();

    let mut stream = client
        .unary_stream(
            "helloworld.Greeter",
            "SayHelloGroup",
            json!({ "name": "sinskyviridianforgejackharry" }),
            CallOptions::default(),
        )
        .await
        .unwrap();

    let first = stream.next().await.unwrap().unwrap();
    assert_eq!(first.into_record().unwrap(), json!({ "message": "Hello, sinsky!" }));

    stream.close();

    assert!(stream.is_closed());
    assert!(stream.next().await.is_none());

    // The client stays usable after abandoning a stream.
    let reply = client
        .unary_unary(
            "helloworld.Greeter",
            "SayHello",
            json!({ "name": "jack" }),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(reply.into_record().unwrap(), json!({ "message": "Hello, jack!" }));

    client.close();
}

#[tokio::test]
async fn test_stream_outlives_a_closed_client() {
    let mut client = setup_client();

    let stream = client
        .unary_stream(
            "helloworld.Greeter",
            "SayHelloGroup",
            json!({ "name": "jackharry" }),
            CallOptions::default(),
        )
        .await
        .unwrap();

    client.close();

    let replies: Vec<_> = collect_records(stream)
        .await
        .into_iter()
        .map(Result::unwrap)
        .collect();
    assert_eq!(
        replies,
        vec![
            json!({ "message": "Hello, jack!" }),
            json!({ "message": "Hello, harry!" }),
        ]
    );
}

#[tokio::test]
async fn test_skip_availability_check_registers_only_the_called_service() {
    let mut client = setup_client().with_skip_availability_check(true);

    let reply = client
        .unary_unary(
            "helloworld.Greeter",
            "SayHello",
            json!({ "name": "sinsky" }),
            CallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(reply.into_record().unwrap(), json!({ "message": "Hello, sinsky!" }));

    assert!(!client.catalog().is_fully_registered());
    assert!(client.service_descriptor("dependencies.Greeter").is_none());
}
