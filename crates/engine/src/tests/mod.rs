mod helpers;
mod transpose_tests;
