//! Data request lifecycle: creation, status machine, authorization and queries.

pub mod access;
pub mod auth;
pub mod create;
pub mod query;
pub mod update;

pub use access::{create_access_request_to_private_dataset, has_access_to_private_dataset};
pub use create::{process_bulk_data_request, process_single_data_request};
pub use query::{
    get_aggregated_open_data_requests_with_aggregated_request_priority, get_data_request_by_id,
    get_data_requests,
};
pub use update::{
    patch_all_requests_to_status_non_sourceable, patch_data_request,
    patch_request_status_from_open_or_non_sourceable_to_answered, process_user_requests,
    ProcessedUserRequests, SUBSIDIARY_ANSWER_REASON,
};
