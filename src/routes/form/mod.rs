mod handler;
mod memory;
mod model;
mod repository;

pub use handler::{
    check_token,
    clear_form_cache,
    get_public_form,
    publish_form,
    submit_form,
    unpublish_form,
    update_form,
};
pub use memory::MemoryFormRepository;
pub use model::{
    FormInfo, FormRecord, FormRepository, FormStatus, RepositoryError, Submission,
    SubmissionGate, UpdateFormRequest,
};
pub use repository::PgFormRepository;
