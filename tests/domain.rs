use axum_storefront_api::models::{OrderStatus, Role};
use axum_storefront_api::response::Meta;
use axum_storefront_api::routes::params::Pagination;

#[test]
fn sanctioned_transitions_are_allowed() {
    assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Confirmed));
    assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Cancelled));
    assert!(OrderStatus::Confirmed.can_transition_to(OrderStatus::Shipped));
    assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::Delivered));
}

#[test]
fn skipping_a_step_is_rejected() {
    assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Shipped));
    assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Delivered));
    assert!(!OrderStatus::Confirmed.can_transition_to(OrderStatus::Delivered));
    assert!(!OrderStatus::Confirmed.can_transition_to(OrderStatus::Cancelled));
    assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Cancelled));
}

#[test]
fn going_backwards_is_rejected() {
    assert!(!OrderStatus::Confirmed.can_transition_to(OrderStatus::Pending));
    assert!(!OrderStatus::Shipped.can_transition_to(OrderStatus::Confirmed));
    assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Shipped));
}

#[test]
fn delivered_and_cancelled_are_terminal() {
    assert!(OrderStatus::Delivered.is_terminal());
    assert!(OrderStatus::Cancelled.is_terminal());
    assert!(OrderStatus::Delivered.allowed_next().is_empty());
    assert!(OrderStatus::Cancelled.allowed_next().is_empty());
    assert!(!OrderStatus::Pending.is_terminal());
    assert!(!OrderStatus::Confirmed.is_terminal());
    assert!(!OrderStatus::Shipped.is_terminal());
}

#[test]
fn status_strings_round_trip() {
    for status in [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ] {
        assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
    }
    assert_eq!(OrderStatus::parse("paid"), None);
    assert_eq!(OrderStatus::parse(""), None);
    assert_eq!(OrderStatus::parse("Pending"), None);
}

#[test]
fn role_strings_round_trip() {
    assert_eq!(Role::parse("customer"), Some(Role::Customer));
    assert_eq!(Role::parse("admin"), Some(Role::Admin));
    assert_eq!(Role::parse("superuser"), None);
    assert_eq!(Role::Customer.as_str(), "customer");
    assert_eq!(Role::Admin.as_str(), "admin");
}

#[test]
fn pagination_defaults_and_clamping() {
    let (page, per_page, offset) = Pagination {
        page: None,
        per_page: None,
    }
    .normalize();
    assert_eq!((page, per_page, offset), (1, 20, 0));

    let (page, per_page, offset) = Pagination {
        page: Some(0),
        per_page: Some(500),
    }
    .normalize();
    assert_eq!((page, per_page, offset), (1, 50, 0));

    let (page, per_page, offset) = Pagination {
        page: Some(3),
        per_page: Some(10),
    }
    .normalize();
    assert_eq!((page, per_page, offset), (3, 10, 20));

    let (_, per_page, _) = Pagination {
        page: Some(-2),
        per_page: Some(-5),
    }
    .normalize();
    assert_eq!(per_page, 1);
}

#[test]
fn meta_reports_page_shape() {
    let meta = Meta::new(1, 20, 45);
    assert_eq!(meta.total_pages, Some(3));
    assert_eq!(meta.first, Some(true));
    assert_eq!(meta.last, Some(false));

    let meta = Meta::new(3, 20, 45);
    assert_eq!(meta.last, Some(true));
    assert_eq!(meta.first, Some(false));

    let meta = Meta::new(1, 20, 0);
    assert_eq!(meta.total_pages, Some(0));
    assert_eq!(meta.last, Some(true));

    let meta = Meta::new(2, 20, 40);
    assert_eq!(meta.total_pages, Some(2));
    assert_eq!(meta.last, Some(true));
}
