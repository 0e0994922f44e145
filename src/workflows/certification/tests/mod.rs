mod common;
mod issuance;
mod transitions;
