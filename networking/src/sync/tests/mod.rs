mod common;

mod synchronizer_tests;
