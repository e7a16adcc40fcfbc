mod test_codec;
