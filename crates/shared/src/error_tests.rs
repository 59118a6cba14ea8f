use super::*;
use rstest::rstest;

#[rstest]
#[case(AppError::Unauthorized("no actor".into()), 401, "UNAUTHORIZED")]
#[case(AppError::Forbidden("teacher".into()), 403, "FORBIDDEN")]
#[case(AppError::Validation("bad body".into()), 400, "VALIDATION_ERROR")]
fn test_app_error_mapping(#[case] err: AppError, #[case] status: u16, #[case] code: &str) {
    assert_eq!(err.status_code(), status);
    assert_eq!(err.error_code(), code);
}

#[test]
fn test_app_error_display() {
    assert_eq!(
        AppError::Forbidden("role 'professor' may not sweep".into()).to_string(),
        "Access denied: role 'professor' may not sweep"
    );
}

#[test]
fn test_app_result_alias() {
    fn read_body() -> AppResult<()> {
        Err(AppError::Validation("expected JSON".into()))
    }
    assert!(matches!(read_body(), Err(AppError::Validation(_))));
}
