fn main() {
    digit_classifier_lib::run()
}
