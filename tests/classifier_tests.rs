//! Integration tests for local-origin request validation

use cacheproxy::classifier::{Classifier, Rejection, Validation};
use cacheproxy::Config;

fn classifier() -> Classifier {
    Classifier::new(&Config::default())
}

#[test]
fn test_valid_size() {
    assert_eq!(
        classifier().validate_request_line("GET /500 HTTP/1.1"),
        Validation::Valid { size: 500 }
    );
}

#[test]
fn test_too_long() {
    assert_eq!(
        classifier().validate_request_line("GET /99999 HTTP/1.1"),
        Validation::Invalid(Rejection::UriTooLong(99999))
    );
}

#[test]
fn test_method_not_allowed() {
    let validation = classifier().validate_request_line("POST /500 HTTP/1.1");
    match validation {
        Validation::Invalid(rejection @ Rejection::MethodNotAllowed(_)) => {
            assert_eq!(rejection.status_line(), "HTTP/1.1 501 Not Implemented");
        }
        other => panic!("expected method-not-allowed, got {:?}", other),
    }
}

#[test]
fn test_malformed_uri() {
    let validation = classifier().validate_request_line("GET /abc HTTP/1.1");
    match validation {
        Validation::Invalid(rejection @ Rejection::Malformed(_)) => {
            assert_eq!(rejection.status_line(), "HTTP/1.1 400 Bad Request");
        }
        other => panic!("expected malformed, got {:?}", other),
    }
}

#[test]
fn test_wrong_token_count_is_malformed() {
    for line in ["GET /500", "GET /500 HTTP/1.1 junk", ""] {
        assert!(
            matches!(
                classifier().validate_request_line(line),
                Validation::Invalid(Rejection::Malformed(_))
            ),
            "{:?} should be malformed",
            line
        );
    }
}

#[test]
fn test_limit_is_exclusive() {
    let config = Config {
        uri_size_limit: 1000,
        ..Config::default()
    };
    let classifier = Classifier::new(&config);

    assert_eq!(classifier.validate_request_line("GET /999 HTTP/1.1"), Validation::Valid { size: 999 });
    assert_eq!(
        classifier.validate_request_line("GET /1000 HTTP/1.1"),
        Validation::Invalid(Rejection::UriTooLong(1000))
    );
}

#[test]
fn test_absolute_form_target() {
    assert_eq!(
        classifier().validate_request_line("GET http://127.0.0.1:8080/100 HTTP/1.1"),
        Validation::Valid { size: 100 }
    );
}

#[test]
fn test_rejections_carry_reason_text() {
    assert_eq!(Rejection::UriTooLong(99999).status_line(), "HTTP/1.1 414 URI Too Long");
    assert!(!Rejection::UriTooLong(99999).reason().is_empty());
    assert!(!Rejection::Malformed("x".into()).reason().is_empty());
}
