pub mod support;

mod scenarios;
